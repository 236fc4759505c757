//! Per-session state machine

use serde::{Deserialize, Serialize};

/// Where a session is in its turn lifecycle.
///
/// The happy path walks `Idle → Transcribing → Generating → Synthesizing
/// → Speaking → Idle` (text input skips `Transcribing`). `Interrupted`
/// is a transitional hop on the way back to `Idle`/`Listening`, never a
/// resting state. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No turn in flight, not expecting input
    Idle,

    /// Continuous mode: suspended waiting for the next input
    Listening,

    Transcribing,
    Generating,
    Synthesizing,
    Speaking,

    /// In-flight turn was cancelled; resolves to Idle or Listening
    Interrupted,

    /// Session closed, terminal
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        self == SessionState::Closed
    }

    /// States from which `submit_input` may start a turn outright
    pub fn can_accept_input(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Listening)
    }

    /// States with a turn in flight
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Transcribing
                | SessionState::Generating
                | SessionState::Synthesizing
                | SessionState::Speaking
        )
    }

    /// The stable state a session settles into between turns
    pub fn resting(continuous: bool) -> Self {
        if continuous {
            SessionState::Listening
        } else {
            SessionState::Idle
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Listening => "Listening",
            SessionState::Transcribing => "Transcribing",
            SessionState::Generating => "Generating",
            SessionState::Synthesizing => "Synthesizing",
            SessionState::Speaking => "Speaking",
            SessionState::Interrupted => "Interrupted",
            SessionState::Closed => "Closed",
        };
        write!(f, "{name}")
    }
}
