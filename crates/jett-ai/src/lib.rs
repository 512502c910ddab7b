pub mod events;
pub mod intent;
pub mod llm;
pub mod router;
pub mod session;
pub mod voice;

pub use events::SessionEvent;
pub use intent::parse_command;
pub use router::{QueryRouter, RoutedStream, TelemetrySnapshot};
pub use session::{SessionControl, SessionMachine, SessionState, TurnOutcome};
