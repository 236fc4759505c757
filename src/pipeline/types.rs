//! Ephemeral value objects passed through one turn of the pipeline

use crate::history::Turn;
use crate::profile::PersonalityProfile;
use crate::session::{SessionEvent, SessionState};
use crate::{SessionId, TurnId};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// User input for one turn
#[derive(Debug, Clone)]
pub enum InputPayload {
    /// Raw captured audio, to be transcribed
    Audio(Vec<u8>),

    /// Text input, transcription stage is skipped
    Text(String),
}

/// Everything the coordinator needs to execute one turn. Not persisted.
pub struct PipelineRequest {
    pub session_id: SessionId,
    pub turn_id: TurnId,
    pub ordinal: u64,
    pub input: InputPayload,
    pub profile: PersonalityProfile,
    pub language_hint: Option<String>,
    pub cancel: CancellationToken,
}

/// Terminal outcome of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// The recorded turn, already appended to history
    pub turn: Turn,

    /// Output chunks that reached the presentation boundary
    pub chunks_delivered: u64,
}

/// The slice of per-session state a turn is allowed to touch: the state
/// cell (shared with the session manager) and the event channel.
#[derive(Clone)]
pub struct TurnContext {
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    pub continuous: bool,
}

impl TurnContext {
    pub fn new(
        state: Arc<Mutex<SessionState>>,
        events: broadcast::Sender<SessionEvent>,
        continuous: bool,
    ) -> Self {
        Self {
            state,
            events,
            continuous,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Move to a new state and notify subscribers
    pub fn transition(&self, to: SessionState) {
        let from = {
            let mut state = self.state.lock();
            std::mem::replace(&mut *state, to)
        };
        if from != to {
            debug!(%from, %to, "session state changed");
            let _ = self.events.send(SessionEvent::StateChanged { from, to });
        }
    }

    /// Emit a non-state event. Send errors just mean nobody is
    /// subscribed right now.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
