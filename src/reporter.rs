//! Operator-facing progress log.
//!
//! Every lifecycle message and every executed statement is routed through a
//! [`Reporter`]. Statement traces start with [`TRACE_MARKER`] and are kept out
//! of the default view; they still reach `log::debug!`.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Prefix of machine-generated statement trace lines
pub const TRACE_MARKER: &str = "Executing";

type Sink = Arc<dyn Fn(&str) + Send + Sync>;

/// Line-oriented progress reporter
#[derive(Clone)]
pub struct Reporter {
    sink: Sink,
    show_trace: bool,
}

impl Reporter {
    /// Reporter that writes to the `log` facade at `info` level
    pub fn new() -> Self {
        Self::with_sink(|line| log::info!(target: "stepwise", "{line}"))
    }

    /// Reporter that hands every visible line to `sink`
    pub fn with_sink(sink: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
            show_trace: false,
        }
    }

    /// Reporter collecting visible lines into a shared buffer
    pub fn capture() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let buffer = Arc::clone(&lines);
        let reporter = Self::with_sink(move |line| {
            if let Ok(mut lines) = buffer.lock() {
                lines.push(line.to_string());
            }
        });
        (reporter, lines)
    }

    /// Also show statement trace lines
    pub fn show_trace(mut self, show: bool) -> Self {
        self.show_trace = show;
        self
    }

    /// Report one line; trace lines are suppressed unless enabled
    pub fn log(&self, line: &str) {
        if is_trace_line(line) && !self.show_trace {
            log::debug!(target: "stepwise::sql", "{line}");
            return;
        }
        (self.sink)(line);
    }

    /// Report an executed statement
    pub fn statement(&self, sql: &str) {
        self.log(&format!("{TRACE_MARKER} (default): {}", sql.trim()));
    }

    /// Report a failure
    pub fn error(&self, message: impl fmt::Display) {
        log::error!(target: "stepwise", "{message}");
        (self.sink)(&format!("ERROR: {message}"));
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter")
            .field("show_trace", &self.show_trace)
            .finish_non_exhaustive()
    }
}

/// Whether `line` is a statement trace
pub fn is_trace_line(line: &str) -> bool {
    line.starts_with(TRACE_MARKER)
}
