use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

/// Error taxonomy shared by every crate in the workspace.
///
/// Submission paths branch on the transient/permanent split: transient
/// failures are queued for replay, permanent ones are surfaced once and
/// never retried automatically.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Missing certificate or incomplete credentials. Fatal until the user
    /// fixes the configuration; never queued.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The authority rejected the presented credentials.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// Transport unreachable. Transient.
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// The payload was rejected, locally or remotely. Permanent.
    #[error("validation error: {0}")]
    Validation(String),

    /// Remote-side failure (5xx and friends). Transient, retried like
    /// connectivity failures.
    #[error("authority service error: {0}")]
    Service(String),

    /// Persistence collaborator failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ClientError {
    /// Transient errors keep the submission queued; everything else is a
    /// terminal outcome for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Connectivity(_) | ClientError::Service(_))
    }
}
