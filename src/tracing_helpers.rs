//! Span helpers for the optional `tracing` feature.

use tracing::{info_span, Span};

/// Span covering connection establishment
pub fn acquire_connection_span() -> Span {
    info_span!("stepwise.connect")
}

/// Span covering one executed statement
pub fn execute_query_span(query: &str) -> Span {
    info_span!("stepwise.execute", db.statement = %query.trim())
}

/// Span covering one migration step
pub fn migration_step_span(id: &str, direction: &str) -> Span {
    info_span!("stepwise.step", migration.id = %id, migration.direction = %direction)
}
