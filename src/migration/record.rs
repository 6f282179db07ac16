//! `AppliedRecord` - one entry in a bookkeeping store

use crate::interface::Row;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// An applied unit as recorded by a storage backend
///
/// Timestamps are only present for tables in the timestamped shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AppliedRecord {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Build a record from a raw bookkeeping row
    ///
    /// Returns `None` when the identifier column is missing or null.
    pub fn from_row(row: &Row, column: &str) -> Option<Self> {
        let name = match row.get(column)? {
            Value::String(s) => s.clone(),
            Value::Null => return None,
            other => other.to_string(),
        };
        Some(Self {
            name,
            created_at: row.get(super::meta_schema::CREATED_AT).and_then(parse_timestamp),
            updated_at: row.get(super::meta_schema::UPDATED_AT).and_then(parse_timestamp),
        })
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // text-cast timestamptz: `2023-01-01 10:00:00+00`
            DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_row_with_timestamps() {
        let mut row = Row::new();
        row.insert("name".into(), json!("20230101000000-create-users"));
        row.insert("createdAt".into(), json!("2023-01-01T10:00:00+00:00"));
        row.insert("updatedAt".into(), json!("2023-01-01 10:00:00.5+02"));

        let record = AppliedRecord::from_row(&row, "name").unwrap();
        assert_eq!(record.name, "20230101000000-create-users");
        assert_eq!(record.created_at.unwrap().to_rfc3339(), "2023-01-01T10:00:00+00:00");
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_from_row_without_identifier() {
        let mut row = Row::new();
        row.insert("version".into(), json!("1"));
        assert!(AppliedRecord::from_row(&row, "name").is_none());

        row.insert("name".into(), Value::Null);
        assert!(AppliedRecord::from_row(&row, "name").is_none());
    }
}
