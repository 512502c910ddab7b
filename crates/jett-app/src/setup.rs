use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use jett_ai::llm::build_backends;
use jett_ai::QueryRouter;
use jett_core::config::AppConfig;
use jett_guard::{build_delegate, ActionGovernor, FileAuditLog};

/// Load and validate the config. An explicit path must parse; there is no
/// fallback to defaults for it.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load_or_default(None),
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

pub fn open_audit(config: &AppConfig) -> Result<Arc<FileAuditLog>> {
    let dir = Path::new(&config.audit.dir);
    let log = FileAuditLog::open(dir, config.audit.max_recent)
        .with_context(|| format!("Failed to open audit log in {}", dir.display()))?;
    Ok(Arc::new(log))
}

pub fn create_governor(config: &AppConfig) -> Result<Arc<ActionGovernor>> {
    let audit = open_audit(config)?;
    let delegate = build_delegate(&config.governor)?;
    tracing::info!(delegate = %config.governor.delegate, "Governor ready");
    Ok(Arc::new(ActionGovernor::from_config(config, audit, delegate)?))
}

pub fn create_router(config: &AppConfig) -> Result<Arc<QueryRouter>> {
    let (local, cloud) = build_backends(&config.router);
    Ok(Arc::new(QueryRouter::from_config(&config.router, local, cloud)?))
}
