//! Operation and audit type system for Jett.
//!
//! Defines the privileged operations the assistant may request, the policy
//! decision attached to each request, and the audit record shape that every
//! other crate writes and reads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version of the on-disk audit record schema.
pub const AUDIT_SCHEMA_VERSION: u8 = 1;

/// Container lifecycle operations the assistant may request.
///
/// Destructive or code-executing verbs (create, remove, exec, pull, delete)
/// have no variant and therefore cannot be expressed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Start,
    Stop,
    Restart,
    Logs,
    Status,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Start,
        OperationKind::Stop,
        OperationKind::Restart,
        OperationKind::Logs,
        OperationKind::Status,
    ];

    /// Inspection-only kinds. These are the only kinds that may be
    /// permitted on a wildcard target.
    pub fn is_read_only(self) -> bool {
        matches!(self, OperationKind::Logs | OperationKind::Status)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Start => "start",
            OperationKind::Stop => "stop",
            OperationKind::Restart => "restart",
            OperationKind::Logs => "logs",
            OperationKind::Status => "status",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a supported operation kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown operation kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for OperationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(OperationKind::Start),
            "stop" => Ok(OperationKind::Stop),
            "restart" => Ok(OperationKind::Restart),
            "logs" | "readlogs" | "read_logs" => Ok(OperationKind::Logs),
            "status" => Ok(OperationKind::Status),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// A single privileged request. Constructed per request and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    /// Resource identifier (container name).
    pub target: String,
    /// Caller identity, e.g. `voice-session` or `console:alice`.
    pub subject: String,
}

impl Operation {
    pub fn new(kind: OperationKind, target: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (by {})", self.kind, self.target, self.subject)
    }
}

/// Outcome of an allowlist lookup. Never persisted on its own; its reason
/// travels inside the audit record that accompanies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub permitted: bool,
    pub reason: String,
}

impl PolicyDecision {
    pub fn permit(reason: impl Into<String>) -> Self {
        Self {
            permitted: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            permitted: false,
            reason: reason.into(),
        }
    }
}

/// Successful result of a governed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub operation: Operation,
    /// Delegate output (already redacted).
    pub output: String,
}

/// Lifecycle status carried by each audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    Attempt,
    Success,
    Denied,
    Error,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditStatus::Attempt => "ATTEMPT",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Denied => "DENIED",
            AuditStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// An audit event before the log has sequenced it.
///
/// `detail` must already be redacted: the log trusts its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub subject: String,
    pub operation: String,
    pub target: String,
    pub status: AuditStatus,
    pub detail: String,
}

impl AuditEntry {
    pub fn for_operation(op: &Operation, status: AuditStatus, detail: impl Into<String>) -> Self {
        Self {
            subject: op.subject.clone(),
            operation: op.kind.as_str().to_string(),
            target: op.target.clone(),
            status,
            detail: detail.into(),
        }
    }
}

/// A sequenced, durable audit record as stored (one JSON line each).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub v: u8,
    /// Strictly increasing across the life of the log file.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub subject: String,
    pub operation: String,
    pub target: String,
    pub status: AuditStatus,
    pub detail: String,
    /// Hex SHA-256 of the previous stored line.
    pub prev: String,
}

impl AuditRecord {
    /// Pipe-delimited rendering used by the CLI feed.
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            self.seq,
            self.ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            self.status,
            self.subject,
            self.operation,
            self.target,
            self.detail
        )
    }
}
