pub mod config;
pub mod error;
pub mod interfaces;
pub mod lifecycle;
pub mod security;

pub use config::{AppConfig, Route, RouterMode};
pub use error::{
    AuditError, BackendError, CaptureError, ConfigError, GovernorError, SessionError,
    SynthesisError, TranscriptionError,
};
pub use security::{
    AuditEntry, AuditRecord, AuditStatus, ExecutionResult, Operation, OperationKind,
    PolicyDecision,
};
