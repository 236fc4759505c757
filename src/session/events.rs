//! Events emitted to session subscribers
//!
//! Every state transition and output chunk is observable through the
//! per-session broadcast channel; the presentation layer renders these.

use crate::history::{FailureCause, Turn};
use crate::session::state::SessionState;
use crate::TurnId;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    /// The session moved between states
    StateChanged {
        from: SessionState,
        to: SessionState,
    },

    /// Transcription produced the user's text
    Transcript { turn_id: TurnId, text: String },

    /// A streamed fragment of the generated response
    ResponseDelta { turn_id: TurnId, text: String },

    /// An ordered chunk of synthesized output, ready for playback
    OutputChunk {
        turn_id: TurnId,
        seq: u64,
        text: String,
        audio: Vec<u8>,
        /// Delivered past the reorder window, ordering is best-effort
        reorder_warned: bool,
    },

    /// The turn finished and was appended to history
    TurnCompleted { turn: Turn },

    /// The turn was cancelled by barge-in or an explicit interrupt
    TurnInterrupted { turn_id: TurnId },

    /// The turn failed terminally; the session remains usable
    TurnFailed {
        turn_id: TurnId,
        cause: FailureCause,
        detail: String,
    },

    /// The session reached its terminal state
    Closed,
}
