//! Collaborators for the session machine: microphone, speech-to-text,
//! wake word, and speech output. The console versions need no hardware.

#[cfg(feature = "voice-stt")]
pub mod capture;
pub mod console;
#[cfg(feature = "voice-stt")]
pub mod stt;
pub mod tts;
pub mod wake;

pub use console::{ConsoleSynthesizer, LineCapture, LineWake, TextTranscriber};
pub use tts::PiperSynthesizer;
pub use wake::WakeWordDetector;
