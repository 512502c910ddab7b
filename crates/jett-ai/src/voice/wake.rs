#[cfg(feature = "wake-word")]
mod inner {
    use anyhow::{Context, Result};
    use ringbuf::traits::*;
    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

    use jett_core::interfaces::WakeDetector;

    use crate::voice::capture::SharedConsumer;

    /// Wake word detector using rustpotter, fed from the shared microphone buffer.
    pub struct WakeWordDetector {
        detector: Rustpotter,
        consumer: SharedConsumer,
        frame: Vec<f32>,
    }

    impl WakeWordDetector {
        pub fn new(
            model_path: &str,
            threshold: f32,
            consumer: SharedConsumer,
            sample_rate: usize,
        ) -> Result<Self> {
            let mut config = RustpotterConfig::default();
            config.fmt.sample_rate = sample_rate;
            config.fmt.channels = 1;
            config.fmt.sample_format = SampleFormat::F32;
            config.detector.threshold = threshold;

            let mut detector =
                Rustpotter::new(&config).context("Failed to create rustpotter detector")?;
            detector
                .add_wakeword_from_file("jett", model_path)
                .context("Failed to load wake word model")?;

            let frame = vec![0.0f32; detector.get_samples_per_frame()];
            tracing::info!("Wake word detector loaded from {model_path}");
            Ok(Self {
                detector,
                consumer,
                frame,
            })
        }
    }

    impl WakeDetector for WakeWordDetector {
        fn poll(&mut self) -> bool {
            let mut cons = self.consumer.lock().unwrap_or_else(|e| e.into_inner());
            while cons.occupied_len() >= self.frame.len() {
                cons.pop_slice(&mut self.frame);
                if self.detector.process_f32(&self.frame).is_some() {
                    return true;
                }
            }
            false
        }
    }
}

#[cfg(feature = "wake-word")]
pub use inner::WakeWordDetector;

/// Stub wake word detector when rustpotter is not available. Never
/// triggers; turns start only through manual activation.
#[cfg(not(feature = "wake-word"))]
pub struct WakeWordDetector;

#[cfg(not(feature = "wake-word"))]
impl WakeWordDetector {
    pub fn new(_model_path: &str) -> anyhow::Result<Self> {
        tracing::warn!(
            "Wake word detection disabled (built without 'wake-word' feature). \
             Press Enter to start a turn."
        );
        Ok(Self)
    }
}

#[cfg(not(feature = "wake-word"))]
impl jett_core::interfaces::WakeDetector for WakeWordDetector {
    fn poll(&mut self) -> bool {
        false
    }
}

#[cfg(all(test, not(feature = "wake-word")))]
mod tests {
    use jett_core::interfaces::WakeDetector;

    use super::*;

    #[test]
    fn stub_detector_never_triggers() {
        let mut detector = WakeWordDetector::new("unused").unwrap();
        for _ in 0..100 {
            assert!(!detector.poll());
        }
    }
}
