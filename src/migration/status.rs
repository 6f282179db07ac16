//! Migration status tracking

use crate::migration::record::AppliedRecord;

/// Migration status information
#[derive(Debug, Clone, Default)]
pub struct MigrationStatus {
    /// Applied units, sorted by identifier
    pub executed: Vec<AppliedRecord>,

    /// Discovered units not yet applied, in discovery order
    pub pending: Vec<String>,

    /// Applied identifiers with no discovered unit
    pub missing: Vec<String>,
}

impl MigrationStatus {
    #[must_use]
    pub fn new(executed: Vec<AppliedRecord>, pending: Vec<String>, missing: Vec<String>) -> Self {
        Self {
            executed,
            pending,
            missing,
        }
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }

    /// Latest applied identifier
    #[must_use]
    pub fn latest_applied(&self) -> Option<&str> {
        self.executed.last().map(|r| r.name.as_str())
    }

    /// Next identifier `up` would apply
    #[must_use]
    pub fn next_pending(&self) -> Option<&str> {
        self.pending.first().map(String::as_str)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.executed.len() + self.pending.len()
    }
}
