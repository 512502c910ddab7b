//! Privileged action governance for Jett.
//!
//! [`ActionGovernor`] is the only path from an intent to a container
//! operation. It composes the [`PolicyAllowlist`], the [`RateLimiter`] and an
//! [`AuditSink`], and calls an [`OperationDelegate`](jett_core::interfaces::OperationDelegate)
//! only after both gates pass.

pub mod allowlist;
pub mod audit;
pub mod delegate;
pub mod governor;
pub mod rate_limit;
pub mod redact;

pub use allowlist::PolicyAllowlist;
pub use audit::{AuditSink, FileAuditLog, MemoryAuditLog};
pub use delegate::{build_delegate, DryRunDelegate, PortainerDelegate};
pub use governor::ActionGovernor;
pub use rate_limit::{Admission, RateLimiter};
pub use redact::redact;
