pub mod assembler;
pub mod config;
pub mod gateway;
pub mod history;
pub mod interrupt;
pub mod pipeline;
pub mod profile;
pub mod session;

use thiserror::Error;
use uuid::Uuid;

/// Opaque identifier for one conversation session.
pub type SessionId = Uuid;

/// Opaque identifier for one turn within a session.
pub type TurnId = Uuid;

#[derive(Error, Debug, Clone)]
pub enum ConfabError {
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ConfabError {
    fn from(e: std::io::Error) -> Self {
        ConfabError::StorageError(e.to_string())
    }
}

impl ConfabError {
    /// Check if the session remains usable after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Session-level fatal: no session exists to recover
            ConfabError::ProfileNotFound(_) => false,
            ConfabError::SessionNotFound(_) => false,
            // Caller error, session state unchanged
            ConfabError::InvalidState(_) => true,
            // Per-turn terminal, session returns to idle
            ConfabError::TranscriptionFailed(_) => true,
            ConfabError::GenerationFailed(_) => true,
            ConfabError::SynthesisFailed(_) => true,
            ConfabError::StorageError(_) => false,
            ConfabError::ChannelError(_) => false,
            ConfabError::ConfigError(_) => false,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            ConfabError::ProfileNotFound(_) => {
                "The requested personality profile does not exist.".to_string()
            }
            ConfabError::SessionNotFound(_) => {
                "This conversation no longer exists.".to_string()
            }
            ConfabError::InvalidState(_) => {
                "The assistant is busy. Please wait for the current response.".to_string()
            }
            ConfabError::TranscriptionFailed(_) => {
                "Speech recognition failed. Please try again.".to_string()
            }
            ConfabError::GenerationFailed(_) => {
                "Response generation failed. Please try again.".to_string()
            }
            ConfabError::SynthesisFailed(_) => {
                "Text-to-speech failed. Response will be shown as text.".to_string()
            }
            ConfabError::StorageError(_) => {
                "Conversation storage error occurred.".to_string()
            }
            ConfabError::ChannelError(_) => {
                "Internal communication error. Please restart the application.".to_string()
            }
            ConfabError::ConfigError(_) => {
                "Configuration error. Please check settings.".to_string()
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfabError>;
