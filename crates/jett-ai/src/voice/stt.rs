use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use jett_core::error::TranscriptionError;
use jett_core::interfaces::{AudioBuffer, Transcriber};

/// Whisper expects 16kHz mono.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Speech-to-text engine using whisper.cpp (CPU-only to avoid VRAM contention).
pub struct SttEngine {
    ctx: WhisperContext,
}

impl SttEngine {
    /// Load a whisper GGML model file.
    pub fn new(model_path: &str) -> Result<Self> {
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| anyhow::anyhow!("Failed to load whisper model: {:?}", e))?;
        tracing::info!("Whisper STT model loaded from {model_path}");
        Ok(Self { ctx })
    }

    /// Transcribe f32 mono 16kHz audio samples to text.
    pub fn transcribe(&self, samples: &[f32]) -> Result<String> {
        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| anyhow::anyhow!("Failed to create whisper state: {:?}", e))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some("en"));
        params.set_no_timestamps(true);

        state
            .full(params, samples)
            .map_err(|e| anyhow::anyhow!("Whisper transcription failed: {:?}", e))?;

        let mut text = String::new();
        let n_segments = state.full_n_segments();
        for i in 0..n_segments {
            if let Some(segment) = state.get_segment(i) {
                text.push_str(&segment.to_string());
            }
        }

        Ok(text.trim().to_string())
    }
}

/// Linear resampling to `to` Hz. Good enough for speech.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from as f64 / to as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            a + (b - a) * frac
        })
        .collect()
}

/// [`Transcriber`] over a shared [`SttEngine`]. Inference runs on the
/// blocking pool.
pub struct WhisperTranscriber {
    engine: Arc<SttEngine>,
}

impl WhisperTranscriber {
    pub fn new(model_path: &str) -> Result<Self> {
        Ok(Self {
            engine: Arc::new(SttEngine::new(model_path)?),
        })
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(
        &self,
        audio: AudioBuffer,
        cancel: &CancellationToken,
    ) -> Result<String, TranscriptionError> {
        if let Some(text) = audio.text_hint {
            return Ok(text);
        }
        let samples = resample(&audio.samples, audio.sample_rate, WHISPER_SAMPLE_RATE);
        let engine = Arc::clone(&self.engine);
        let job = tokio::task::spawn_blocking(move || engine.transcribe(&samples));
        tokio::select! {
            _ = cancel.cancelled() => Err(TranscriptionError("cancelled".into())),
            joined = job => match joined {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(TranscriptionError(format!("{e:#}"))),
                Err(e) => Err(TranscriptionError(format!("transcription task failed: {e}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_halves_length() {
        let input: Vec<f32> = (0..32_000).map(|i| (i % 100) as f32 / 100.0).collect();
        let out = resample(&input, 32_000, 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_interpolates() {
        let out = resample(&[0.0, 1.0], 2, 4);
        assert_eq!(out.len(), 4);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }
}
