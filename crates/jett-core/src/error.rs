use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the action governor.
///
/// `PolicyDenied` and `RateLimited` are governance failures and are always
/// accompanied by a DENIED audit record. `Execution` means the delegate
/// itself failed after both gates passed.
#[derive(Error, Debug)]
pub enum GovernorError {
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    #[error("Rate limited, retry after {}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Audit write failed: {0}")]
    Audit(#[from] AuditError),
}

impl GovernorError {
    pub fn is_governance(&self) -> bool {
        matches!(
            self,
            GovernorError::PolicyDenied(_) | GovernorError::RateLimited { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Hash chain broken at seq {seq}: {reason}")]
    ChainBroken { seq: u64, reason: String },
}

/// Failures from an LLM backend.
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Backend rejected credentials: {0}")]
    Unauthenticated(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Stream error: {0}")]
    Stream(String),
}

impl BackendError {
    /// Errors that justify serving the request from the local backend instead.
    pub fn is_fallback_trigger(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::Unauthenticated(_)
        )
    }
}

#[derive(Error, Debug)]
#[error("Transcription failed: {0}")]
pub struct TranscriptionError(pub String);

#[derive(Error, Debug)]
#[error("Synthesis failed: {0}")]
pub struct SynthesisError(pub String);

#[derive(Error, Debug)]
#[error("Audio capture failed: {0}")]
pub struct CaptureError(pub String);

/// Reasons a session turn ended before playback completed.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Session timed out in {state}")]
    Timeout { state: String },

    #[error("Session cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Wildcard target not allowed for mutating kind '{0}'")]
    WildcardOnMutatingKind(String),

    #[error("Unknown operation kind in allowlist: {0}")]
    UnknownKind(String),

    #[error("Rate limit '{0}' must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("Invalid router rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
