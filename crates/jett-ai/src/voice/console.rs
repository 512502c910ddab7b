use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use jett_core::error::{CaptureError, SynthesisError, TranscriptionError};
use jett_core::interfaces::{AudioBuffer, SpeechCapture, Synthesizer, TokenStream, Transcriber, WakeDetector};

type Pending = Arc<Mutex<Option<String>>>;

/// Typed lines instead of a microphone. Each line is a wake followed by
/// that line as the utterance.
pub struct LineWake {
    rx: Receiver<String>,
    pending: Pending,
    shutdown: CancellationToken,
}

pub struct LineCapture {
    pending: Pending,
}

/// Read stdin on a background thread. `shutdown` is cancelled once stdin is
/// exhausted and the session is idle again.
pub fn stdin_input(shutdown: CancellationToken) -> (LineWake, LineCapture) {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    line_input(rx, shutdown)
}

pub fn line_input(rx: Receiver<String>, shutdown: CancellationToken) -> (LineWake, LineCapture) {
    let pending: Pending = Arc::new(Mutex::new(None));
    (
        LineWake {
            rx,
            pending: Arc::clone(&pending),
            shutdown,
        },
        LineCapture { pending },
    )
}

impl WakeDetector for LineWake {
    fn poll(&mut self) -> bool {
        match self.rx.try_recv() {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    return false;
                }
                *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(line.to_string());
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                if !self.shutdown.is_cancelled() {
                    tracing::info!("Input closed");
                    self.shutdown.cancel();
                }
                false
            }
        }
    }
}

#[async_trait]
impl SpeechCapture for LineCapture {
    async fn record(
        &mut self,
        _cancel: &CancellationToken,
    ) -> Result<Option<AudioBuffer>, CaptureError> {
        let line = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(line.map(AudioBuffer::from_text))
    }
}

/// Passes through the text carried by console buffers.
pub struct TextTranscriber;

#[async_trait]
impl Transcriber for TextTranscriber {
    async fn transcribe(
        &self,
        audio: AudioBuffer,
        _cancel: &CancellationToken,
    ) -> Result<String, TranscriptionError> {
        audio.text_hint.ok_or_else(|| {
            TranscriptionError("audio input needs the voice-stt feature".into())
        })
    }
}

/// Prints tokens to stdout as they arrive.
pub struct ConsoleSynthesizer;

#[async_trait]
impl Synthesizer for ConsoleSynthesizer {
    async fn stream_speak(
        &self,
        mut tokens: TokenStream,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        let mut out = std::io::stdout();
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = tokens.next() => item,
            };
            let Some(item) = item else { break };
            let token = item.map_err(|e| SynthesisError(format!("response stream failed: {e}")))?;
            write!(out, "{token}").map_err(|e| SynthesisError(e.to_string()))?;
            out.flush().map_err(|e| SynthesisError(e.to_string()))?;
        }
        writeln!(out).map_err(|e| SynthesisError(e.to_string()))?;
        Ok(())
    }
}
