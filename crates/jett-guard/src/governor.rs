//! The single entry point for privileged operations.
//!
//! `authorize` writes ATTEMPT, checks the allowlist, checks the rate limiter,
//! and only then calls the delegate. The outcome record is written by a guard
//! object, so SUCCESS or ERROR lands in the audit trail on every exit path,
//! including a panicking delegate or a future dropped mid-call.

use std::sync::Arc;

use jett_core::config::{AppConfig, Route};
use jett_core::error::{AuditError, ConfigError, GovernorError};
use jett_core::interfaces::OperationDelegate;
use jett_core::security::{AuditEntry, AuditRecord, AuditStatus, ExecutionResult, Operation};

use crate::allowlist::PolicyAllowlist;
use crate::audit::AuditSink;
use crate::rate_limit::{Admission, RateLimiter};
use crate::redact::redact;

pub const ROUTE_OPERATION: &str = "route";

pub struct ActionGovernor {
    allowlist: PolicyAllowlist,
    limiter: RateLimiter,
    audit: Arc<dyn AuditSink>,
    delegate: Arc<dyn OperationDelegate>,
    subject: String,
}

impl ActionGovernor {
    pub fn new(
        allowlist: PolicyAllowlist,
        limiter: RateLimiter,
        audit: Arc<dyn AuditSink>,
        delegate: Arc<dyn OperationDelegate>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            allowlist,
            limiter,
            audit,
            delegate,
            subject: subject.into(),
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        audit: Arc<dyn AuditSink>,
        delegate: Arc<dyn OperationDelegate>,
    ) -> Result<Self, ConfigError> {
        let allowlist = PolicyAllowlist::from_config(&cfg.governor.allow)?;
        let limiter = RateLimiter::from_config(&cfg.governor)?;
        Ok(Self::new(
            allowlist,
            limiter,
            audit,
            delegate,
            cfg.governor.subject.clone(),
        ))
    }

    /// Default subject for operations originating in the voice session.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn authorize(&self, op: &Operation) -> Result<ExecutionResult, GovernorError> {
        // Without a durable ATTEMPT nothing else may happen.
        self.write(op, AuditStatus::Attempt, "requested")?;

        let decision = self.allowlist.decide(op);
        if !decision.permitted {
            let detail = redact(&format!("policy: {}", decision.reason));
            tracing::warn!(%op, "Denied by policy");
            self.write_denial(op, &detail);
            return Err(GovernorError::PolicyDenied(detail));
        }

        if let Admission::Limited(retry_after) = self.limiter.check(&op.subject) {
            let detail = format!(
                "rate limited: retry after {:.0}s",
                retry_after.as_secs_f64().ceil()
            );
            tracing::warn!(%op, "Denied by rate limit");
            self.write_denial(op, &detail);
            return Err(GovernorError::RateLimited { retry_after });
        }

        let guard = OutcomeGuard::new(Arc::clone(&self.audit), op);
        tracing::info!(%op, "Executing");
        match self.delegate.execute(op).await {
            Ok(output) => {
                let output = redact(&output);
                guard.complete(AuditStatus::Success, &output)?;
                Ok(ExecutionResult {
                    operation: op.clone(),
                    output,
                })
            }
            Err(e) => {
                let detail = redact(&format!("{e:#}"));
                tracing::error!(%op, "Execution failed: {detail}");
                guard.complete(AuditStatus::Error, &detail)?;
                Err(GovernorError::Execution(detail))
            }
        }
    }

    /// Record the routing decision of a turn that also carried a privileged command.
    pub fn record_route(
        &self,
        subject: &str,
        verdict: Route,
        signal: &str,
        served_by: Route,
    ) -> Result<AuditRecord, AuditError> {
        let mut detail = format!("signal={signal} served_by={served_by}");
        if verdict != served_by {
            detail.push_str(" fallback=true");
        }
        self.audit.append(AuditEntry {
            subject: subject.to_string(),
            operation: ROUTE_OPERATION.to_string(),
            target: verdict.to_string(),
            status: AuditStatus::Success,
            detail: redact(&detail),
        })
    }

    pub fn recent(&self, n: usize) -> Result<Vec<AuditRecord>, AuditError> {
        self.audit.recent(n)
    }

    fn write(&self, op: &Operation, status: AuditStatus, detail: &str) -> Result<(), AuditError> {
        self.audit
            .append(AuditEntry::for_operation(op, status, redact(detail)))
            .map(|_| ())
            .map_err(|e| {
                tracing::error!(%op, "Audit write ({status}) failed: {e}");
                e
            })
    }

    fn write_denial(&self, op: &Operation, detail: &str) {
        // The denial is still returned to the caller if this write fails.
        let _ = self.write(op, AuditStatus::Denied, detail);
    }
}

/// Writes the outcome record exactly once. If dropped before `complete`, the
/// call never reached a normal exit and an ERROR record is written.
struct OutcomeGuard {
    audit: Arc<dyn AuditSink>,
    operation: Operation,
    armed: bool,
}

impl OutcomeGuard {
    fn new(audit: Arc<dyn AuditSink>, op: &Operation) -> Self {
        Self {
            audit,
            operation: op.clone(),
            armed: true,
        }
    }

    fn complete(mut self, status: AuditStatus, detail: &str) -> Result<(), AuditError> {
        self.armed = false;
        self.audit
            .append(AuditEntry::for_operation(&self.operation, status, detail))
            .map(|_| ())
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let detail = "aborted before completion";
        tracing::error!(op = %self.operation, "Delegate call {detail}");
        let entry = AuditEntry::for_operation(&self.operation, AuditStatus::Error, detail);
        if let Err(e) = self.audit.append(entry) {
            tracing::error!("Audit write (ERROR) failed: {e}");
        }
    }
}
