use std::process::Stdio;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use jett_core::config::VoiceConfig;
use jett_core::error::SynthesisError;
use jett_core::interfaces::{Synthesizer, TokenStream};

/// Speak the first chunk once it reaches this length at a clause break,
/// without waiting for the sentence to end.
const MIN_FIRST_CHUNK: usize = 20;

/// Groups streamed tokens into sentence-sized pieces for synthesis.
#[derive(Debug, Default)]
pub struct SentenceChunker {
    buf: String,
    emitted: bool,
}

impl SentenceChunker {
    pub fn push(&mut self, token: &str) -> Option<String> {
        self.buf.push_str(token);
        let trimmed = self.buf.trim_end();
        let sentence_end = trimmed.ends_with(['.', '!', '?']);
        let early_break = !self.emitted
            && trimmed.len() >= MIN_FIRST_CHUNK
            && trimmed.ends_with([',', ';', ':']);
        if !(sentence_end || early_break) {
            return None;
        }
        let chunk = trimmed.trim().to_string();
        self.buf.clear();
        if chunk.is_empty() {
            return None;
        }
        self.emitted = true;
        Some(chunk)
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = self.buf.trim().to_string();
        self.buf.clear();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Text-to-speech using Piper as a subprocess, piped into `aplay`.
pub struct PiperSynthesizer {
    piper_binary: String,
    model_path: String,
    config_path: String,
}

impl PiperSynthesizer {
    pub fn new(piper_binary: &str, model_path: &str, config_path: &str) -> Self {
        Self {
            piper_binary: piper_binary.to_string(),
            model_path: model_path.to_string(),
            config_path: config_path.to_string(),
        }
    }

    pub fn from_config(cfg: &VoiceConfig) -> Self {
        Self::new(&cfg.piper_binary, &cfg.piper_model, &cfg.piper_config)
    }

    /// Speak one chunk. Returns early, killing both processes, on cancel.
    pub async fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<(), SynthesisError> {
        if text.is_empty() {
            return Ok(());
        }
        tracing::debug!("TTS speaking: {text}");

        // piper --model X --config Y --output-raw | aplay -r 22050 -f S16_LE -c 1
        let mut piper = Command::new(&self.piper_binary)
            .args([
                "--model",
                &self.model_path,
                "--config",
                &self.config_path,
                "--output-raw",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthesisError(format!("Failed to spawn piper: {e}")))?;

        if let Some(mut stdin) = piper.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| SynthesisError(format!("Failed to write to piper stdin: {e}")))?;
        }

        let piper_stdout: Stdio = piper
            .stdout
            .take()
            .ok_or_else(|| SynthesisError("No piper stdout".into()))?
            .try_into()
            .map_err(|e| SynthesisError(format!("Failed to pipe piper output: {e}")))?;

        let mut aplay = Command::new("aplay")
            .args(["-r", "22050", "-f", "S16_LE", "-c", "1", "-q"])
            .stdin(piper_stdout)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SynthesisError(format!("Failed to spawn aplay: {e}")))?;

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = piper.start_kill();
                let _ = aplay.start_kill();
            }
            _ = async {
                let _ = piper.wait().await;
                let _ = aplay.wait().await;
            } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl Synthesizer for PiperSynthesizer {
    async fn stream_speak(
        &self,
        mut tokens: TokenStream,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        let mut chunker = SentenceChunker::default();
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                item = tokens.next() => item,
            };
            let Some(item) = item else { break };
            let token = item.map_err(|e| SynthesisError(format!("response stream failed: {e}")))?;
            if let Some(chunk) = chunker.push(&token) {
                self.speak(&chunk, cancel).await?;
            }
        }
        if let Some(rest) = chunker.finish() {
            self.speak(&rest, cancel).await?;
        }
        Ok(())
    }
}
