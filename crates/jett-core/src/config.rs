use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::security::OperationKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub governor: GovernorConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

/// One allowlist entry. `target = "*"` is accepted only for read-only kinds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllowEntry {
    pub kind: String,
    pub target: String,
}

impl AllowEntry {
    pub fn new(kind: OperationKind, target: &str) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            target: target.to_string(),
        }
    }
}

pub const WILDCARD_TARGET: &str = "*";

#[derive(Debug, Clone, Deserialize)]
pub struct GovernorConfig {
    /// Subject identity used for operations originating in the voice session.
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_allow")]
    pub allow: Vec<AllowEntry>,
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    #[serde(default = "default_per_hour")]
    pub per_hour: u32,
    /// `dry-run` or `portainer`.
    #[serde(default = "default_delegate")]
    pub delegate: String,
    #[serde(default = "default_portainer_url")]
    pub portainer_url: String,
    #[serde(default = "default_portainer_endpoint")]
    pub portainer_endpoint: u32,
    #[serde(default = "default_portainer_token_env")]
    pub portainer_token_env: String,
    #[serde(default = "default_logs_tail")]
    pub logs_tail: u32,
}

fn default_subject() -> String {
    "voice-session".into()
}
fn default_allow() -> Vec<AllowEntry> {
    let mut allow = Vec::new();
    for target in ["n8n", "postgres", "qdrant", "redis"] {
        for kind in OperationKind::ALL {
            allow.push(AllowEntry::new(kind, target));
        }
    }
    allow
}
fn default_per_minute() -> u32 {
    10
}
fn default_per_hour() -> u32 {
    100
}
fn default_delegate() -> String {
    "dry-run".into()
}
fn default_portainer_url() -> String {
    "https://localhost:9443".into()
}
fn default_portainer_endpoint() -> u32 {
    1
}
fn default_portainer_token_env() -> String {
    "PORTAINER_TOKEN".into()
}
fn default_logs_tail() -> u32 {
    50
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            subject: default_subject(),
            allow: default_allow(),
            per_minute: default_per_minute(),
            per_hour: default_per_hour(),
            delegate: default_delegate(),
            portainer_url: default_portainer_url(),
            portainer_endpoint: default_portainer_endpoint(),
            portainer_token_env: default_portainer_token_env(),
            logs_tail: default_logs_tail(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_dir")]
    pub dir: String,
    /// Upper bound on `recent(n)` reads.
    #[serde(default = "default_max_recent")]
    pub max_recent: usize,
}

fn default_audit_dir() -> String {
    "data/audit".into()
}
fn default_max_recent() -> usize {
    1000
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            dir: default_audit_dir(),
            max_recent: default_max_recent(),
        }
    }
}

/// Execution locus for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Local,
    Cloud,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Local => f.write_str("local"),
            Route::Cloud => f.write_str("cloud"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    Local,
    Cloud,
    #[default]
    Hybrid,
}

/// A user-supplied classifier rule. Rules are evaluated in file order.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    pub pattern: String,
    pub route: Route,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub mode: RouterMode,
    /// Utterances with at most this many words go local regardless of rules.
    #[serde(default = "default_short_words")]
    pub short_utterance_words: usize,
    /// Utterances with at least this many words go to the cloud when no rule fired.
    #[serde(default = "default_long_words")]
    pub long_utterance_words: usize,
    /// Replaces the built-in rule list when non-empty.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_local_model")]
    pub local_model: String,
    #[serde(default = "default_local_max_tokens")]
    pub local_max_tokens: u32,
    #[serde(default = "default_cloud_model")]
    pub cloud_model: String,
    #[serde(default = "default_cloud_url")]
    pub cloud_url: String,
    #[serde(default = "default_cloud_api_key_env")]
    pub cloud_api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Budget for the cloud to connect, answer, and produce its first token
    /// before the router serves the query locally instead.
    #[serde(default = "default_cloud_first_token")]
    pub cloud_first_token_ms: u64,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_short_words() -> usize {
    5
}
fn default_long_words() -> usize {
    25
}
fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}
fn default_local_model() -> String {
    "jett-qwen3".into()
}
fn default_local_max_tokens() -> u32 {
    80
}
fn default_cloud_model() -> String {
    "claude-sonnet-4-5-20250929".into()
}
fn default_cloud_url() -> String {
    "https://api.anthropic.com/v1/messages".into()
}
fn default_cloud_api_key_env() -> String {
    "ANTHROPIC_API_KEY".into()
}
fn default_max_tokens() -> u32 {
    150
}
fn default_cloud_first_token() -> u64 {
    4000
}
fn default_system_prompt() -> String {
    "You are Jett, a concise voice assistant. Answer in one to three short spoken sentences.".into()
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: RouterMode::default(),
            short_utterance_words: default_short_words(),
            long_utterance_words: default_long_words(),
            rules: Vec::new(),
            ollama_url: default_ollama_url(),
            local_model: default_local_model(),
            local_max_tokens: default_local_max_tokens(),
            cloud_model: default_cloud_model(),
            cloud_url: default_cloud_url(),
            cloud_api_key_env: default_cloud_api_key_env(),
            max_tokens: default_max_tokens(),
            cloud_first_token_ms: default_cloud_first_token(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl RouterConfig {
    pub fn cloud_first_token(&self) -> Duration {
        Duration::from_millis(self.cloud_first_token_ms)
    }
}

/// Stall bounds per waiting state.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_listen_timeout")]
    pub listen_timeout_ms: u64,
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_ms: u64,
    #[serde(default = "default_speaking_timeout")]
    pub speaking_timeout_ms: u64,
    #[serde(default = "default_wake_poll")]
    pub wake_poll_ms: u64,
}

fn default_listen_timeout() -> u64 {
    10_000
}
fn default_processing_timeout() -> u64 {
    20_000
}
fn default_speaking_timeout() -> u64 {
    60_000
}
fn default_wake_poll() -> u64 {
    50
}

impl SessionConfig {
    pub fn listen_timeout(&self) -> Duration {
        Duration::from_millis(self.listen_timeout_ms)
    }
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_millis(self.processing_timeout_ms)
    }
    pub fn speaking_timeout(&self) -> Duration {
        Duration::from_millis(self.speaking_timeout_ms)
    }
    pub fn wake_poll(&self) -> Duration {
        Duration::from_millis(self.wake_poll_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listen_timeout_ms: default_listen_timeout(),
            processing_timeout_ms: default_processing_timeout(),
            speaking_timeout_ms: default_speaking_timeout(),
            wake_poll_ms: default_wake_poll(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "default_wake_word_model")]
    pub wake_word_model: String,
    #[serde(default = "default_wake_threshold")]
    pub wake_threshold: f32,
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
    /// Trailing silence that ends an utterance.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    #[serde(default = "default_piper_binary")]
    pub piper_binary: String,
    #[serde(default)]
    pub piper_model: String,
    #[serde(default)]
    pub piper_config: String,
}

fn default_wake_word_model() -> String {
    "models/jett.rpw".into()
}
fn default_wake_threshold() -> f32 {
    0.5
}
fn default_whisper_model() -> String {
    "models/ggml-base.en.bin".into()
}
fn default_silence_ms() -> u64 {
    800
}
fn default_piper_binary() -> String {
    "piper".into()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_word_model: default_wake_word_model(),
            wake_threshold: default_wake_threshold(),
            whisper_model: default_whisper_model(),
            silence_ms: default_silence_ms(),
            piper_binary: default_piper_binary(),
            piper_model: String::new(),
            piper_config: String::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config with fallback chain: explicit path → ./config/default.toml → hardcoded defaults.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Self {
        if let Some(path) = explicit_path {
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {e}", path.display());
                }
            }
        }

        let default_path = Path::new("config/default.toml");
        if default_path.exists() {
            match Self::load(default_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    tracing::warn!("Failed to load default config: {e}");
                }
            }
        }

        tracing::info!("Using hardcoded default configuration");
        Self::default()
    }

    /// Reject configurations that would build an unsafe or unusable component.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for entry in &self.governor.allow {
            let kind: OperationKind = entry
                .kind
                .parse()
                .map_err(|_| ConfigError::UnknownKind(entry.kind.clone()))?;
            if entry.target == WILDCARD_TARGET && !kind.is_read_only() {
                return Err(ConfigError::WildcardOnMutatingKind(entry.kind.clone()));
            }
            if entry.target.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "governor.allow.target",
                    reason: "empty target".into(),
                });
            }
        }
        if self.governor.per_minute == 0 {
            return Err(ConfigError::ZeroLimit("per_minute"));
        }
        if self.governor.per_hour == 0 {
            return Err(ConfigError::ZeroLimit("per_hour"));
        }
        if !matches!(self.governor.delegate.as_str(), "dry-run" | "portainer") {
            return Err(ConfigError::Invalid {
                field: "governor.delegate",
                reason: format!("unknown delegate '{}'", self.governor.delegate),
            });
        }
        for rule in &self.router.rules {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                return Err(ConfigError::InvalidRule {
                    id: rule.id.clone(),
                    reason: e.to_string(),
                });
            }
        }
        if self.router.short_utterance_words >= self.router.long_utterance_words {
            return Err(ConfigError::Invalid {
                field: "router.short_utterance_words",
                reason: "must be below long_utterance_words".into(),
            });
        }
        // The local fallback needs time left inside the processing deadline.
        if self.router.cloud_first_token_ms == 0
            || self.router.cloud_first_token_ms >= self.session.processing_timeout_ms / 2
        {
            return Err(ConfigError::Invalid {
                field: "router.cloud_first_token_ms",
                reason: "must be non-zero and under half of session.processing_timeout_ms".into(),
            });
        }
        Ok(())
    }
}
