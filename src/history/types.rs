use crate::TurnId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stage whose terminal failure ended a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureCause {
    Transcription,
    Generation,
    Synthesis,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Transcription => write!(f, "TranscriptionFailed"),
            FailureCause::Generation => write!(f, "GenerationFailed"),
            FailureCause::Synthesis => write!(f, "SynthesisFailed"),
        }
    }
}

/// Terminal outcome of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnStatus {
    Completed,
    Interrupted,
    Failed { cause: FailureCause },
}

/// One request/response exchange, immutable once appended to history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,

    /// Position of this turn within its session
    pub ordinal: u64,

    /// User input after transcription
    pub transcript: String,

    /// Generated response text (partial if the turn was interrupted)
    pub response: String,

    /// Opaque handle to the synthesized audio, if any was delivered
    pub audio_ref: Option<String>,

    pub status: TurnStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl Turn {
    pub fn completed(
        id: TurnId,
        ordinal: u64,
        transcript: String,
        response: String,
        audio_ref: Option<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            ordinal,
            transcript,
            response,
            audio_ref,
            status: TurnStatus::Completed,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Partial audio is always discarded on interruption, so no audio_ref.
    pub fn interrupted(
        id: TurnId,
        ordinal: u64,
        transcript: String,
        partial_response: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            ordinal,
            transcript,
            response: partial_response,
            audio_ref: None,
            status: TurnStatus::Interrupted,
            started_at,
            ended_at: Utc::now(),
        }
    }

    /// Zero-content audit record for a failed turn. Contributes nothing
    /// to the prompt context of subsequent turns.
    pub fn failed(id: TurnId, ordinal: u64, cause: FailureCause, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            ordinal,
            transcript: String::new(),
            response: String::new(),
            audio_ref: None,
            status: TurnStatus::Failed { cause },
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TurnStatus::Completed
    }

    /// Rough token estimate used for the context budget
    pub fn estimated_tokens(&self) -> usize {
        (self.transcript.len() + self.response.len()) / 4 + 1
    }
}

/// One completed user/assistant exchange, as used for prompt construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub user: String,
    pub assistant: String,
}

impl From<&Turn> for Exchange {
    fn from(turn: &Turn) -> Self {
        Self {
            user: turn.transcript.clone(),
            assistant: turn.response.clone(),
        }
    }
}
