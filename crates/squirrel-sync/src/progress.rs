//! Progress and problem reporting during sync.

use parking_lot::Mutex;
use tracing::{info, warn};

/// Severity of a progress message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Notice,
    Warning,
    Error,
}

/// Receives user-facing messages while a sync runs.
///
/// Sync never stops on a single bad action or a failed save; it reports
/// through here and carries on.
pub trait ProgressSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);

    fn notice(&self, message: &str) {
        self.report(Severity::Notice, message);
    }

    fn warning(&self, message: &str) {
        self.report(Severity::Warning, message);
    }

    fn error(&self, message: &str) {
        self.report(Severity::Error, message);
    }
}

/// Logs every message through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Notice => info!("{message}"),
            Severity::Warning => warn!("{message}"),
            Severity::Error => tracing::error!("{message}"),
        }
    }
}

/// Keeps every message for later inspection.
#[derive(Debug, Default)]
pub struct CollectingProgress {
    messages: Mutex<Vec<(Severity, String)>>,
}

impl CollectingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(Severity, String)> {
        self.messages.lock().clone()
    }

    /// Messages at `severity` only.
    pub fn at(&self, severity: Severity) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl ProgressSink for CollectingProgress {
    fn report(&self, severity: Severity, message: &str) {
        self.messages.lock().push((severity, message.to_string()));
    }
}
