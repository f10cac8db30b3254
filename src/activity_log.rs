//! Activity Logging Module
//!
//! Structured activity logging for auditing and debugging.
//! IMPORTANT: This module must NEVER log PHI or credentials.
//!
//! What IS logged:
//! - Event types and outcomes (success/failure)
//! - Auth state transitions
//! - Resource types, entry counts, error kinds
//!
//! What is NOT logged:
//! - Access tokens, code verifiers, authorization codes
//! - Patient ids, names, identifiers, birth dates
//! - Any clinical content

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Held for the life of the process so buffered file logs are flushed
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Initialize logging
///
/// - Console output (human-readable, filtered by `RUST_LOG`, default `level`)
/// - File output (JSON, daily rotation) in `log_dir`
pub fn init_logging(log_dir: &Path, level: &str) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "activity.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    LOG_GUARD.set(guard).ok();

    let file_layer = fmt::layer()
        .json()
        .with_timer(UtcTime::rfc_3339())
        .with_writer(non_blocking)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    info!(
        event = "logging_initialized",
        log_dir = %log_dir.display(),
        "Activity logging system initialized"
    );

    Ok(())
}

/// ~/.patientportal/logs
pub fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let home = dirs::home_dir().ok_or("Could not determine home directory")?;
    Ok(home.join(".patientportal").join("logs"))
}

// ============================================================================
// Auth Events
// ============================================================================

/// Log an auth action ("login_start", "login_complete", "restore", "logout")
pub fn log_auth(action: &str, success: bool, error: Option<&str>) {
    if success {
        info!(
            event = "auth",
            action = %action,
            success = true,
            "Authentication action"
        );
    } else {
        warn!(
            event = "auth",
            action = %action,
            success = false,
            error = error,
            "Authentication action failed"
        );
    }
}

/// Log an auth state machine transition
pub fn log_auth_transition(from_state: &str, to_state: &str) {
    info!(
        event = "auth_transition",
        from_state = %from_state,
        to_state = %to_state,
        "Auth state changed"
    );
}

// ============================================================================
// Fetch Events
// ============================================================================

/// Log a FHIR read (entry count only, never content)
pub fn log_fetch(
    resource_type: &str,
    success: bool,
    entry_count: Option<usize>,
    error_kind: Option<&str>,
) {
    if success {
        info!(
            event = "fhir_fetch",
            resource_type = %resource_type,
            entry_count = entry_count,
            success = true,
            "FHIR resources fetched"
        );
    } else {
        warn!(
            event = "fhir_fetch",
            resource_type = %resource_type,
            success = false,
            error_kind = error_kind,
            "FHIR fetch failed"
        );
    }
}

/// Log a dashboard section being opened or collapsed
pub fn log_section(section: &str, action: &str) {
    info!(
        event = "section",
        section = %section,
        action = %action,
        "Dashboard section changed"
    );
}

/// Buffered log capture for tests that check what reaches the activity log
#[cfg(test)]
pub(crate) mod capture {
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::DefaultGuard;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    pub(crate) struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        pub(crate) fn contents(&self) -> String {
            self.0
                .lock()
                .map(|buf| String::from_utf8_lossy(&buf).into_owned())
                .unwrap_or_default()
        }
    }

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Ok(mut captured) = self.0.lock() {
                captured.extend_from_slice(buf);
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    /// Send this thread's events, every level, as JSON lines (the file
    /// layer's format) into a buffer until the guard drops
    pub(crate) fn capture() -> (CapturedLogs, DefaultGuard) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::TRACE)
            .with_writer(logs.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }
}

#[cfg(test)]
mod tests {
    use super::capture::capture;
    use super::*;

    #[test]
    fn test_log_directory() {
        let dir = get_log_directory().unwrap();
        assert!(dir.ends_with("logs"));
        assert!(dir.to_string_lossy().contains(".patientportal"));
    }

    #[test]
    fn test_fetch_events_carry_counts_and_kinds() {
        let (logs, _guard) = capture();
        log_fetch("Observation", true, Some(12), None);
        log_fetch("Patient", false, None, Some("unauthorized"));

        let output = logs.contents();
        assert_eq!(output.matches("fhir_fetch").count(), 2);
        assert!(output.contains("\"entry_count\":12"));
        assert!(output.contains("\"error_kind\":\"unauthorized\""));
    }

    #[test]
    fn test_auth_events_carry_action_and_outcome() {
        let (logs, _guard) = capture();
        log_auth("login_complete", false, Some("missing_verifier"));
        log_auth_transition("Unauthenticated", "AwaitingProviderRedirect");

        let output = logs.contents();
        assert!(output.contains("\"action\":\"login_complete\""));
        assert!(output.contains("\"error\":\"missing_verifier\""));
        assert!(output.contains("\"to_state\":\"AwaitingProviderRedirect\""));
    }

    #[test]
    fn test_capture_is_scoped_to_guard() {
        let (logs, guard) = capture();
        log_section("vital_signs", "open");
        drop(guard);
        log_section("vital_signs", "collapse");

        let output = logs.contents();
        assert!(output.contains("\"action\":\"open\""));
        assert!(!output.contains("collapse"));
    }
}
