//! Error policy: classification, severity, recovery guidance, and crash
//! reports.
//!
//! Every fallible core operation returns [`Error`], which carries the
//! category, severity, operation name, a stable machine-readable code, and a
//! structured context map. Recovery is advisory: [`recovery_for`] names the
//! strategy a caller may apply at most once per error instance, and
//! [`ErrorSink`] keeps the bounded history that fatal crash reports embed.
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

/// Error categories used to select a handling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FileAccess,
    Process,
    Resource,
    Network,
    Validation,
    Security,
    Configuration,
    Unknown,
}

/// How badly an error impacts the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Retry or continue; surfaced only when retries are exhausted.
    Recoverable,
    /// Continue with reduced capability; a notification is emitted.
    Degraded,
    /// Abort the current attack, keep the engine running.
    Critical,
    /// Abort the engine after a crash report and cleanup.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
#[error("{operation}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub severity: Severity,
    /// Short name of the operation that failed, e.g. `"checkpoint"`.
    pub operation: String,
    /// Stable machine-readable code, e.g. `"path_outside_roots"`.
    pub code: &'static str,
    pub message: String,
    pub context: BTreeMap<String, String>,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(
        kind: ErrorKind,
        severity: Severity,
        operation: impl Into<String>,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity,
            operation: operation.into(),
            code,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Attach a `key=value` context entry.
    pub fn with_context(mut self, key: &str, value: impl ToString) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Classify an [`io::Error`] per the policy table: not-found is
    /// recoverable, permission problems are critical, out-of-memory is fatal,
    /// timeouts are recoverable.
    pub fn from_io(err: io::Error, operation: &str, path: &Path) -> Self {
        let (kind, severity, code) = match err.kind() {
            io::ErrorKind::NotFound => {
                (ErrorKind::FileAccess, Severity::Recoverable, "file_not_found")
            }
            io::ErrorKind::PermissionDenied => {
                (ErrorKind::FileAccess, Severity::Critical, "permission_denied")
            }
            io::ErrorKind::OutOfMemory => (ErrorKind::Resource, Severity::Fatal, "out_of_memory"),
            io::ErrorKind::TimedOut => (ErrorKind::Process, Severity::Recoverable, "timed_out"),
            io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => {
                (ErrorKind::Network, Severity::Recoverable, "connection_failed")
            }
            _ => (ErrorKind::FileAccess, Severity::Critical, "io_error"),
        };
        Error::new(kind, severity, operation, code, err.to_string())
            .with_context("path", path.display().to_string())
            .with_source(err)
    }

    pub fn validation(operation: &str, message: impl Into<String>) -> Self {
        Error::new(
            ErrorKind::Validation,
            Severity::Critical,
            operation,
            "invalid_input",
            message,
        )
    }

    pub fn security(operation: &str, message: impl Into<String>) -> Self {
        Error::new(
            ErrorKind::Security,
            Severity::Fatal,
            operation,
            "security_violation",
            message,
        )
    }

    pub fn configuration(operation: &str, message: impl Into<String>) -> Self {
        Error::new(
            ErrorKind::Configuration,
            Severity::Recoverable,
            operation,
            "bad_configuration",
            message,
        )
    }

    pub fn process(operation: &str, code: &'static str, message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Process, Severity::Recoverable, operation, code, message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Recovery strategy a caller may apply, at most once per error instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Retry the operation against a registered alternative path.
    AlternatePath,
    /// Retry in a temp-dir fallback location (permission errors).
    TempDirFallback,
    /// Retry the operation with the timeout doubled.
    DoubleTimeout(Duration),
    /// Drop caches, halve batch sizes; on GPU paths, fall back to CPU.
    ReduceFootprint,
    /// Retry after the given backoff delay.
    Backoff(Duration),
    /// Sanitize the offending input and retry once.
    Sanitize,
    /// Substitute a registered default value.
    UseDefault,
}

/// Bounded number of retries applied to recoverable process/network errors.
pub const MAX_RETRIES: u32 = 3;

/// Map an error to its recovery strategy. `attempt` is zero-based; `None`
/// means "surface the error" (either unrecoverable or retries exhausted).
pub fn recovery_for(err: &Error, attempt: u32, last_timeout: Duration) -> Option<Recovery> {
    if err.severity == Severity::Fatal {
        return None;
    }
    match err.kind {
        ErrorKind::FileAccess => match err.code {
            "permission_denied" => Some(Recovery::TempDirFallback),
            _ => Some(Recovery::AlternatePath),
        },
        ErrorKind::Process => {
            if attempt < MAX_RETRIES {
                Some(Recovery::DoubleTimeout(last_timeout * 2))
            } else {
                None
            }
        }
        ErrorKind::Resource => Some(Recovery::ReduceFootprint),
        ErrorKind::Network => {
            if attempt < MAX_RETRIES {
                Some(Recovery::Backoff(Duration::from_millis(100 << attempt)))
            } else {
                None
            }
        }
        ErrorKind::Validation => {
            if attempt == 0 {
                Some(Recovery::Sanitize)
            } else {
                Some(Recovery::UseDefault)
            }
        }
        ErrorKind::Security | ErrorKind::Configuration | ErrorKind::Unknown => None,
    }
}

#[derive(Debug, Clone, Serialize)]
struct ErrorRecord {
    timestamp: String,
    operation: String,
    kind: ErrorKind,
    severity: Severity,
    code: &'static str,
    message: String,
    context: BTreeMap<String, String>,
}

impl ErrorRecord {
    fn from_error(err: &Error) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            operation: err.operation.clone(),
            kind: err.kind,
            severity: err.severity,
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
        }
    }
}

/// Bounded error history feeding crash reports. Shared across threads.
#[derive(Debug, Default)]
pub struct ErrorSink {
    history: Mutex<VecDeque<ErrorRecord>>,
}

/// Entries retained for crash-report context.
const HISTORY_CAP: usize = 10;

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error, logging it at a level matching its severity.
    pub fn record(&self, err: &Error) {
        match err.severity {
            Severity::Recoverable => log::debug!("{err} [{}]", err.code),
            Severity::Degraded => log::warn!("{err} [{}]", err.code),
            Severity::Critical | Severity::Fatal => log::error!("{err} [{}]", err.code),
        }
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(ErrorRecord::from_error(err));
    }

    /// Write a crash-report JSON for a fatal error, embedding the recent
    /// error history. Returns the report path.
    pub fn write_crash_report(&self, dir: &Path, fatal: &Error) -> io::Result<std::path::PathBuf> {
        #[derive(Serialize)]
        struct CrashReport<'a> {
            timestamp: String,
            operation: &'a str,
            error: String,
            kind: ErrorKind,
            severity: Severity,
            code: &'static str,
            context: &'a BTreeMap<String, String>,
            history: Vec<ErrorRecord>,
        }
        let history = {
            let guard = self.history.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().cloned().collect()
        };
        let report = CrashReport {
            timestamp: Utc::now().to_rfc3339(),
            operation: &fatal.operation,
            error: fatal.to_string(),
            kind: fatal.kind,
            severity: fatal.severity,
            code: fatal.code,
            context: &fatal.context,
            history,
        };
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
            "crash_{}.json",
            Utc::now().format("%Y%m%d_%H%M%S")
        ));
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_classifies_recoverable() {
        let err = Error::from_io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "open_hashes",
            Path::new("/tmp/x"),
        );
        assert_eq!(err.kind, ErrorKind::FileAccess);
        assert_eq!(err.severity, Severity::Recoverable);
        assert_eq!(err.code, "file_not_found");
        assert_eq!(err.context.get("path").unwrap(), "/tmp/x");
    }

    #[test]
    fn permission_denied_is_critical_with_tempdir_fallback() {
        let err = Error::from_io(
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
            "write_session",
            Path::new("/root/x"),
        );
        assert_eq!(err.severity, Severity::Critical);
        assert_eq!(
            recovery_for(&err, 0, Duration::from_secs(1)),
            Some(Recovery::TempDirFallback)
        );
    }

    #[test]
    fn process_timeout_doubles_until_retries_exhausted() {
        let err = Error::process("run_attack", "timed_out", "cracker exceeded deadline");
        assert_eq!(
            recovery_for(&err, 0, Duration::from_secs(30)),
            Some(Recovery::DoubleTimeout(Duration::from_secs(60)))
        );
        assert_eq!(recovery_for(&err, MAX_RETRIES, Duration::from_secs(30)), None);
    }

    #[test]
    fn security_errors_are_fatal_and_unrecoverable() {
        let err = Error::security("build_command", "mask outside safe set");
        assert_eq!(err.severity, Severity::Fatal);
        assert_eq!(recovery_for(&err, 0, Duration::ZERO), None);
    }

    #[test]
    fn sink_keeps_bounded_history_and_writes_report() {
        let sink = ErrorSink::new();
        for i in 0..15 {
            sink.record(&Error::validation("ingest", format!("bad line {i}")));
        }
        let dir = tempfile::tempdir().unwrap();
        let fatal = Error::security("sandbox", "escape attempt");
        let path = sink.write_crash_report(dir.path(), &fatal).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(v["history"].as_array().unwrap().len(), 10);
        assert_eq!(v["code"], "security_violation");
        assert_eq!(v["severity"], "fatal");
    }
}
