use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// One line of the append-only audit log. Every lifecycle transition of a
/// queued submission gets an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub record_id: u64,
    pub state: String,
    pub submission_key: Option<String>,
    pub authorization_code: Option<String>,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, record_id: u64, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            record_id,
            state: state.to_string(),
            submission_key: None,
            authorization_code: None,
            error: None,
        }
    }

    pub fn with_submission_key(mut self, key: String) -> Self {
        self.submission_key = Some(key);
        self
    }

    pub fn with_authorization_code(mut self, code: String) -> Self {
        self.authorization_code = Some(code);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Append an event as one JSON line. Audit failures are logged and
/// swallowed; they must never fail the queue operation itself.
pub fn write_audit_event(path: &Path, event: &AuditEvent) {
    let result = (|| -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let json = serde_json::to_string(event)?;
        writeln!(file, "{json}")?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            tracing::debug!(event_type = %event.event_type, record_id = event.record_id, "audit event written")
        }
        Err(e) => tracing::warn!(error = %e, "failed to write audit event"),
    }
}
