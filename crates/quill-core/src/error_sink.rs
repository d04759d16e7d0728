//! Reporting seam for faults raised by background work.
//!
//! Nothing running off the interactive thread is allowed to propagate a fault
//! to its caller; it is handed to an [`ErrorSink`] instead.

use std::fmt;

use parking_lot::Mutex;

/// Where a reported fault came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub component: &'static str,
    pub key: Option<String>,
    pub version: Option<u64>,
}

impl ErrorContext {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            key: None,
            version: None,
        }
    }

    pub fn with_key(mut self, key: &dyn fmt::Debug) -> Self {
        self.key = Some(format!("{key:?}"));
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.component)?;
        if let Some(key) = &self.key {
            write!(f, " [{key}]")?;
        }
        if let Some(version) = self.version {
            write!(f, " @v{version}")?;
        }
        Ok(())
    }
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &(dyn std::error::Error + 'static), context: ErrorContext);
}

/// Default sink: logs every report at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &(dyn std::error::Error + 'static), context: ErrorContext) {
        tracing::error!(
            target: "quill.errors",
            component = context.component,
            key = ?context.key,
            version = ?context.version,
            error = %error,
            "background fault"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub message: String,
    pub context: ErrorContext,
}

/// Keeps every report in memory. Used by tests and bug-report tooling.
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<ErrorReport>>,
}

impl RecordingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: &(dyn std::error::Error + 'static), context: ErrorContext) {
        self.reports.lock().push(ErrorReport {
            message: error.to_string(),
            context,
        });
    }
}
