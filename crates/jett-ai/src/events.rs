use jett_core::security::Operation;

use crate::session::SessionState;

/// Events from the session machine to whoever is watching (CLI, logs, tests).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    Transcript(String),
    ActionOutcome {
        operation: Operation,
        success: bool,
        detail: String,
    },
    /// A token that went to the synthesizer.
    Spoken(String),
    TurnAborted {
        state: SessionState,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_event_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SessionEvent>();
    }

    #[test]
    fn session_event_clone() {
        let event = SessionEvent::Transcript("restart n8n".into());
        let cloned = event.clone();
        if let SessionEvent::Transcript(text) = cloned {
            assert_eq!(text, "restart n8n");
        } else {
            panic!("Clone should preserve variant");
        }
    }
}
