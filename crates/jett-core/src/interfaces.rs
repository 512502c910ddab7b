//! Collaborator contracts consumed by the session machine, the router and the
//! governor. Implementations live in `jett-ai` (voice, LLM backends) and
//! `jett-guard` (delegates); tests supply their own doubles.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, CaptureError, SynthesisError, TranscriptionError};
use crate::security::Operation;

/// Incremental response tokens. Every backend hands back this exact shape,
/// so consumers never branch on which backend produced it.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, BackendError>> + Send>>;

/// A finalized utterance: mono f32 PCM.
#[derive(Debug, Clone, Default)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Text already known for this utterance (console input). Transcribers
    /// that see it may return it directly.
    pub text_hint: Option<String>,
}

impl AudioBuffer {
    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            text_hint: None,
        }
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate: 16_000,
            text_hint: Some(text.into()),
        }
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Polled while the session is idle. Must return promptly.
pub trait WakeDetector: Send {
    fn poll(&mut self) -> bool;
}

#[async_trait]
pub trait SpeechCapture: Send {
    /// Record until a speech boundary or cancellation. `Ok(None)` means no
    /// speech was captured.
    async fn record(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioBuffer>, CaptureError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: AudioBuffer,
        cancel: &CancellationToken,
    ) -> Result<String, TranscriptionError>;
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Cheap readiness check (configured, credentials present, not marked down).
    fn is_available(&self) -> bool {
        true
    }

    /// Called when a caller gave up on this backend, e.g. after a timeout.
    fn mark_unavailable(&self, _reason: &BackendError) {}

    async fn stream(&self, prompt: &str) -> Result<TokenStream, BackendError>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Consume tokens incrementally and speak them. Returns when playback
    /// completes or `cancel` fires.
    async fn stream_speak(
        &self,
        tokens: TokenStream,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError>;
}

/// Performs the actual privileged effect. Only the governor calls this.
#[async_trait]
pub trait OperationDelegate: Send + Sync {
    async fn execute(&self, operation: &Operation) -> anyhow::Result<String>;
}
