//! Hybrid query routing.
//!
//! [`QueryRouter`] picks the local or cloud backend per query and always hands
//! back the same [`TokenStream`] shape. A cloud backend that is missing,
//! unavailable or rejects the request is replaced by the local one without
//! the caller noticing; the switch is counted in [`RouterTelemetry`].

pub mod classifier;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;

use jett_core::config::{Route, RouterConfig, RouterMode};
use jett_core::error::{BackendError, ConfigError};
use jett_core::interfaces::{LlmBackend, TokenStream};

pub use classifier::{ComplexityClassifier, ComplexityVerdict, Explanation};

pub const SIGNAL_MODE_LOCAL: &str = "mode.local";
pub const SIGNAL_MODE_CLOUD: &str = "mode.cloud";

/// Time the cloud gets to produce its first token before the local backend takes over.
pub const DEFAULT_CLOUD_FIRST_TOKEN: Duration = Duration::from_secs(4);

#[derive(Debug, Default)]
pub struct RouterTelemetry {
    local: AtomicU64,
    cloud: AtomicU64,
    fallbacks: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub local: u64,
    pub cloud: u64,
    pub fallbacks: u64,
}

impl RouterTelemetry {
    fn served(&self, route: Route) {
        match route {
            Route::Local => self.local.fetch_add(1, Ordering::Relaxed),
            Route::Cloud => self.cloud.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            local: self.local.load(Ordering::Relaxed),
            cloud: self.cloud.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// A routed response: the verdict, which backend actually serves it, and the tokens.
pub struct RoutedStream {
    pub verdict: ComplexityVerdict,
    pub served_by: Route,
    pub tokens: TokenStream,
}

impl RoutedStream {
    pub fn fell_back(&self) -> bool {
        self.verdict.route != self.served_by
    }
}

/// Routing diagnostics for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RouteExplanation {
    pub mode: RouterMode,
    pub decision: Route,
    #[serde(flatten)]
    pub classification: Explanation,
    pub cloud_available: bool,
}

pub struct QueryRouter {
    classifier: ComplexityClassifier,
    mode: RouterMode,
    local: Arc<dyn LlmBackend>,
    cloud: Option<Arc<dyn LlmBackend>>,
    cloud_first_token: Duration,
    telemetry: RouterTelemetry,
}

impl QueryRouter {
    pub fn new(
        classifier: ComplexityClassifier,
        mode: RouterMode,
        local: Arc<dyn LlmBackend>,
        cloud: Option<Arc<dyn LlmBackend>>,
    ) -> Self {
        Self {
            classifier,
            mode,
            local,
            cloud,
            cloud_first_token: DEFAULT_CLOUD_FIRST_TOKEN,
            telemetry: RouterTelemetry::default(),
        }
    }

    pub fn with_cloud_first_token(mut self, budget: Duration) -> Self {
        self.cloud_first_token = budget;
        self
    }

    pub fn from_config(
        cfg: &RouterConfig,
        local: Arc<dyn LlmBackend>,
        cloud: Option<Arc<dyn LlmBackend>>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            ComplexityClassifier::from_config(cfg)?,
            cfg.mode,
            local,
            cloud,
        )
        .with_cloud_first_token(cfg.cloud_first_token()))
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn classify(&self, text: &str) -> ComplexityVerdict {
        self.classifier.classify(text)
    }

    /// Verdict after applying the router mode.
    pub fn decide(&self, text: &str) -> ComplexityVerdict {
        match self.mode {
            RouterMode::Local => ComplexityVerdict {
                route: Route::Local,
                matched_signal: SIGNAL_MODE_LOCAL.into(),
            },
            RouterMode::Cloud => ComplexityVerdict {
                route: Route::Cloud,
                matched_signal: SIGNAL_MODE_CLOUD.into(),
            },
            RouterMode::Hybrid => self.classifier.classify(text),
        }
    }

    pub fn explain(&self, text: &str) -> RouteExplanation {
        RouteExplanation {
            mode: self.mode,
            decision: self.decide(text).route,
            classification: self.classifier.explain(text),
            cloud_available: self.cloud.as_ref().is_some_and(|c| c.is_available()),
        }
    }

    /// Stream a response for `text` (used as the prompt).
    pub async fn route(&self, text: &str) -> Result<TokenStream, BackendError> {
        Ok(self.route_with_verdict(text, text).await?.tokens)
    }

    /// Classify `text` and stream a response to `prompt` from the chosen backend.
    pub async fn route_with_verdict(
        &self,
        text: &str,
        prompt: &str,
    ) -> Result<RoutedStream, BackendError> {
        let verdict = self.decide(text);
        tracing::info!(
            route = %verdict.route,
            signal = %verdict.matched_signal,
            "Routing query"
        );

        if verdict.route == Route::Cloud {
            match self.try_cloud(prompt).await {
                Ok(tokens) => {
                    self.telemetry.served(Route::Cloud);
                    return Ok(RoutedStream {
                        verdict,
                        served_by: Route::Cloud,
                        tokens,
                    });
                }
                Err(reason) => {
                    self.telemetry.fallback();
                    if reason.is_fallback_trigger() {
                        tracing::warn!("Cloud backend unavailable, falling back to local: {reason}");
                    } else {
                        tracing::warn!("Cloud request failed, falling back to local: {reason}");
                    }
                }
            }
        }

        let tokens = self.local.stream(prompt).await?;
        self.telemetry.served(Route::Local);
        Ok(RoutedStream {
            verdict,
            served_by: Route::Local,
            tokens,
        })
    }

    /// Open the cloud stream and wait for its first item, so connection and
    /// credential failures surface here instead of mid-speech. A cloud that
    /// stays silent past the budget is treated as unavailable.
    async fn try_cloud(&self, prompt: &str) -> Result<TokenStream, BackendError> {
        let cloud = match &self.cloud {
            Some(c) if c.is_available() => c,
            Some(c) => {
                return Err(BackendError::Unavailable(format!(
                    "{} not available",
                    c.name()
                )))
            }
            None => return Err(BackendError::Unavailable("no cloud backend".into())),
        };

        let opened = async {
            let mut stream = cloud.stream(prompt).await?;
            let first = stream.next().await;
            Ok::<_, BackendError>((first, stream))
        };
        let (first, stream) = match tokio::time::timeout(self.cloud_first_token, opened).await {
            Ok(opened) => opened?,
            Err(_) => {
                let err = BackendError::Unavailable(format!(
                    "{} sent nothing within {}ms",
                    cloud.name(),
                    self.cloud_first_token.as_millis()
                ));
                cloud.mark_unavailable(&err);
                return Err(err);
            }
        };

        match first {
            Some(Ok(first)) => {
                let head = futures_util::stream::once(async move { Ok(first) });
                Ok(Box::pin(head.chain(stream)))
            }
            Some(Err(e)) => Err(e),
            None => Ok(Box::pin(futures_util::stream::empty())),
        }
    }
}
