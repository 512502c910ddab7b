use std::fmt;

use serde::Serialize;

/// Where a voice session is. Exactly one state at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Listening,
    Processing,
    Speaking,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
        };
        f.write_str(s)
    }
}

/// Something that happened to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionInput {
    Wake,
    /// Capture returned an utterance.
    SpeechEnded,
    /// Capture or transcription produced nothing to act on.
    NoSpeech,
    FirstToken,
    /// The response stream ended without a single token.
    EmptyResponse,
    PlaybackDone,
    Cancel,
    Timeout,
    Failed,
}

/// The transition table. `None` means the input is ignored in `state`.
///
/// Wake only counts in `Idle`, so the assistant's own voice can never start a
/// new turn while it is speaking.
pub fn transition(state: SessionState, input: SessionInput) -> Option<SessionState> {
    use SessionInput as I;
    use SessionState as S;

    match (state, input) {
        (S::Idle, I::Wake) => Some(S::Listening),
        (S::Listening, I::SpeechEnded) => Some(S::Processing),
        (S::Listening | S::Processing, I::NoSpeech) => Some(S::Idle),
        (S::Processing, I::FirstToken) => Some(S::Speaking),
        (S::Processing, I::EmptyResponse) => Some(S::Idle),
        (S::Speaking, I::PlaybackDone) => Some(S::Idle),
        (S::Listening | S::Processing | S::Speaking, I::Cancel | I::Timeout | I::Failed) => {
            Some(S::Idle)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [SessionState; 4] = [
        SessionState::Idle,
        SessionState::Listening,
        SessionState::Processing,
        SessionState::Speaking,
    ];

    #[test]
    fn happy_path_cycle() {
        let mut s = SessionState::Idle;
        for input in [
            SessionInput::Wake,
            SessionInput::SpeechEnded,
            SessionInput::FirstToken,
            SessionInput::PlaybackDone,
        ] {
            s = transition(s, input).unwrap();
        }
        assert_eq!(s, SessionState::Idle);
    }

    #[test]
    fn wake_only_from_idle() {
        assert_eq!(
            transition(SessionState::Idle, SessionInput::Wake),
            Some(SessionState::Listening)
        );
        assert_eq!(transition(SessionState::Listening, SessionInput::Wake), None);
        assert_eq!(transition(SessionState::Processing, SessionInput::Wake), None);
        assert_eq!(transition(SessionState::Speaking, SessionInput::Wake), None);
    }

    #[test]
    fn cancel_and_timeout_always_reach_idle() {
        for state in STATES.into_iter().filter(|s| *s != SessionState::Idle) {
            for input in [SessionInput::Cancel, SessionInput::Timeout, SessionInput::Failed] {
                assert_eq!(transition(state, input), Some(SessionState::Idle), "{state} {input:?}");
            }
        }
        assert_eq!(transition(SessionState::Idle, SessionInput::Cancel), None);
    }

    #[test]
    fn no_skipping_states() {
        assert_eq!(transition(SessionState::Idle, SessionInput::FirstToken), None);
        assert_eq!(transition(SessionState::Listening, SessionInput::FirstToken), None);
        assert_eq!(transition(SessionState::Processing, SessionInput::PlaybackDone), None);
    }

    #[test]
    fn display_is_lowercase() {
        assert_eq!(SessionState::Speaking.to_string(), "speaking");
    }
}
