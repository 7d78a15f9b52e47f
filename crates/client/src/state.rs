use chrono::{DateTime, Utc};
use serde::Serialize;

use fe_core::models::Environment;

const MAX_RECENT_ERRORS: usize = 10;

/// Read-only snapshot of the client's health, derived state only, never
/// persisted. Each client instance owns its own copy.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceState {
    pub connected: bool,
    pub authenticated: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub certificate_present: bool,
    pub environment: Environment,
    pub recent_errors: Vec<String>,
    pub pending_count: usize,
    pub offline: bool,
}

impl ServiceState {
    pub fn new(environment: Environment, certificate_present: bool) -> Self {
        Self {
            connected: true,
            authenticated: false,
            last_sync: None,
            certificate_present,
            environment,
            recent_errors: Vec::new(),
            pending_count: 0,
            offline: false,
        }
    }

    pub fn push_error(&mut self, detail: String) {
        if self.recent_errors.len() == MAX_RECENT_ERRORS {
            self.recent_errors.remove(0);
        }
        self.recent_errors.push(detail);
    }
}
