use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{traits::*, HeapRb};
use tokio_util::sync::CancellationToken;

use jett_core::config::VoiceConfig;
use jett_core::error::CaptureError;
use jett_core::interfaces::{AudioBuffer, SpeechCapture};

/// Ring buffer consumer type for reading captured audio.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// One consumer, shared by the wake detector (while idle) and capture
/// (while listening).
pub type SharedConsumer = Arc<Mutex<AudioConsumer>>;

/// Mean-square frame energy below which a frame counts as silence.
const SILENCE_ENERGY: f32 = 0.001;
const MAX_UTTERANCE: Duration = Duration::from_secs(30);
const FRAME: Duration = Duration::from_millis(100);

/// Audio from the default input device.
///
/// The cpal stream lives on its own thread; samples arrive through a
/// lock-free ring buffer holding ~30s of mono audio.
pub struct MicInput {
    consumer: SharedConsumer,
    sample_rate: u32,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MicInput {
    pub fn start(target_sample_rate: u32) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("jett-mic".into())
            .spawn(move || match open_stream(target_sample_rate) {
                Ok((stream, consumer, rate)) => {
                    let _ = ready_tx.send(Ok((consumer, rate)));
                    while !thread_stop.load(Ordering::Relaxed) {
                        std::thread::park_timeout(Duration::from_millis(200));
                    }
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn audio thread")?;

        let (consumer, sample_rate) = ready_rx
            .recv()
            .context("Audio thread exited during startup")??;
        tracing::info!("Audio capture started at {sample_rate}Hz");

        Ok(Self {
            consumer: Arc::new(Mutex::new(consumer)),
            sample_rate,
            stop,
            thread: Some(thread),
        })
    }

    pub fn consumer(&self) -> SharedConsumer {
        Arc::clone(&self.consumer)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}

fn open_stream(target_sample_rate: u32) -> Result<(cpal::Stream, AudioConsumer, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("No audio input device available")?;

    if let Ok(desc) = device.description() {
        tracing::info!("Audio input device: {:?}", desc);
    }

    let config = find_config(&device, target_sample_rate)?;
    let actual_rate = config.sample_rate();
    let channels = config.channels() as usize;

    let rb = HeapRb::<f32>::new(target_sample_rate as usize * 30);
    let (mut prod, cons) = rb.split();

    let stream = device
        .build_input_stream(
            &config.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if channels == 1 {
                    prod.push_slice(data);
                } else {
                    for chunk in data.chunks(channels) {
                        let _ = prod.try_push(chunk[0]);
                    }
                }
            },
            |err| {
                tracing::error!("Audio capture error: {err}");
            },
            None,
        )
        .context("Failed to build input stream")?;

    stream.play().context("Failed to start audio capture")?;
    Ok((stream, cons, actual_rate))
}

fn find_config(device: &cpal::Device, target_rate: u32) -> Result<cpal::SupportedStreamConfig> {
    let configs = device
        .supported_input_configs()
        .context("Failed to query input configs")?;

    let mut best: Option<cpal::SupportedStreamConfigRange> = None;
    for cfg in configs {
        if cfg.sample_format() == cpal::SampleFormat::F32
            && cfg.min_sample_rate() <= target_rate
            && cfg.max_sample_rate() >= target_rate
        {
            if cfg.channels() == 1 {
                return Ok(cfg.with_sample_rate(target_rate));
            }
            best = Some(cfg);
        }
    }

    if let Some(cfg) = best {
        return Ok(cfg.with_sample_rate(target_rate));
    }

    device
        .default_input_config()
        .context("No supported input config")
}

/// Tracks trailing silence after speech has started.
#[derive(Debug)]
pub(crate) struct EnergyVad {
    frames_needed: u32,
    silent_frames: u32,
    heard_speech: bool,
}

impl EnergyVad {
    pub(crate) fn new(silence: Duration) -> Self {
        let frames = silence.as_millis().div_ceil(FRAME.as_millis()).max(1);
        Self {
            frames_needed: u32::try_from(frames).unwrap_or(u32::MAX),
            silent_frames: 0,
            heard_speech: false,
        }
    }

    /// Feed one frame. Returns true once the utterance is over.
    pub(crate) fn push(&mut self, frame: &[f32]) -> bool {
        if frame.is_empty() {
            return false;
        }
        let energy = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        if energy >= SILENCE_ENERGY {
            self.heard_speech = true;
            self.silent_frames = 0;
        } else if self.heard_speech {
            self.silent_frames += 1;
        }
        self.heard_speech && self.silent_frames >= self.frames_needed
    }

    pub(crate) fn heard_speech(&self) -> bool {
        self.heard_speech
    }
}

/// Records one utterance from the microphone, ended by trailing silence.
pub struct MicCapture {
    consumer: SharedConsumer,
    sample_rate: u32,
    silence: Duration,
}

impl MicCapture {
    pub fn new(input: &MicInput, cfg: &VoiceConfig) -> Self {
        Self {
            consumer: input.consumer(),
            sample_rate: input.sample_rate(),
            silence: Duration::from_millis(cfg.silence_ms),
        }
    }

    /// Pop one full frame if available. Never holds the lock across an await.
    fn pop_frame(&self, frame: &mut [f32]) -> bool {
        let mut cons = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
        if cons.occupied_len() < frame.len() {
            return false;
        }
        cons.pop_slice(frame);
        true
    }
}

#[async_trait]
impl SpeechCapture for MicCapture {
    async fn record(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<AudioBuffer>, CaptureError> {
        if self.sample_rate == 0 {
            return Err(CaptureError("input reports a zero sample rate".into()));
        }
        let frame_len = (self.sample_rate as u128 * FRAME.as_millis() / 1000) as usize;
        let max_samples = self.sample_rate as usize * MAX_UTTERANCE.as_secs() as usize;
        let mut frame = vec![0.0f32; frame_len];
        let mut recording: Vec<f32> = Vec::new();
        let mut vad = EnergyVad::new(self.silence);

        // Whatever queued up while idle or speaking is not part of this utterance.
        self.consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        loop {
            while self.pop_frame(&mut frame) {
                let done = vad.push(&frame);
                if vad.heard_speech() {
                    recording.extend_from_slice(&frame);
                }
                if done || recording.len() >= max_samples {
                    tracing::info!(
                        "Recording complete: {} samples ({:.1}s)",
                        recording.len(),
                        recording.len() as f32 / self.sample_rate as f32
                    );
                    return Ok(Some(AudioBuffer::from_samples(recording, self.sample_rate)));
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(FRAME / 2) => {}
            }
        }
    }
}
