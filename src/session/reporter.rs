//! Structured progress reporting
//!
//! The session owns one reporter handle and calls it at session and file
//! boundaries; components never reach for a global.

use std::path::Path;

use tracing::{info, warn};

use crate::domain::SessionState;

/// Progress callbacks for one session
///
/// All methods default to no-ops so implementations override only what
/// they observe.
pub trait Reporter: Send + Sync {
    fn session_started(&self, _session_id: &str, _file_count: usize) {}

    fn file_started(&self, _path: &Path) {}

    fn file_completed(&self, _path: &Path, _errors_fixed: usize) {}

    fn file_failed(&self, _path: &Path, _cause: &str) {}

    fn session_completed(&self, _state: &SessionState) {}
}

/// Default reporter: forwards everything to tracing
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn session_started(&self, session_id: &str, file_count: usize) {
        info!(%session_id, file_count, "Session started");
    }

    fn file_started(&self, path: &Path) {
        info!(path = %path.display(), "Processing file");
    }

    fn file_completed(&self, path: &Path, errors_fixed: usize) {
        info!(path = %path.display(), errors_fixed, "File fixed and committed");
    }

    fn file_failed(&self, path: &Path, cause: &str) {
        warn!(path = %path.display(), %cause, "File failed");
    }

    fn session_completed(&self, state: &SessionState) {
        info!(
            session_id = %state.id,
            status = %state.status,
            fixed = state.total_errors_fixed,
            succeeded = state.successful_fixes.len(),
            failed = state.failed_fixes.len(),
            "Session completed"
        );
    }
}
