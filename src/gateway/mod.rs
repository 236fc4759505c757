//! Typed clients for the transcription, generation, and synthesis services
//!
//! The contracts are transport-agnostic: the surrounding system may back
//! them with HTTP, gRPC, or in-process calls. Transient failures are
//! retried inside this module and never cross the gateway boundary
//! unless retries are exhausted.

pub mod loopback;
pub mod retry;

pub use loopback::{LoopbackGeneration, LoopbackSynthesis, LoopbackTranscription};
pub use retry::with_retry;

use crate::history::Exchange;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use thiserror::Error;

/// Gateway-level failure classification
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    /// Network-level trouble, worth retrying
    #[error("transient gateway error: {0}")]
    Transient(String),

    /// Bad input or a hard backend failure, retrying cannot help
    #[error("terminal gateway error: {0}")]
    Terminal(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

/// A fragment of streamed generated text
#[derive(Debug, Clone)]
pub struct TextChunk {
    pub text: String,
    pub is_final: bool,
}

/// A fragment of streamed synthesized audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub data: Vec<u8>,
    pub is_final: bool,
}

/// Everything the generation backend needs for one response
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub system_prompt: String,

    /// Rolling summary of exchanges evicted from the prompt window
    pub summary: Option<String>,

    /// Trimmed history, chronological
    pub history: Vec<Exchange>,

    /// Latest user input
    pub user_text: String,

    pub temperature: f32,
}

pub type TextStream = BoxStream<'static, std::result::Result<TextChunk, GatewayError>>;
pub type AudioStream = BoxStream<'static, std::result::Result<AudioChunk, GatewayError>>;

#[async_trait]
pub trait TranscriptionGateway: Send + Sync {
    /// Transcribe an utterance. May be called with a language hint.
    async fn transcribe(
        &self,
        audio: &[u8],
        language_hint: Option<&str>,
    ) -> std::result::Result<String, GatewayError>;
}

#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Generate a response as a stream of text chunks, terminated by a
    /// chunk with `is_final` set.
    async fn generate(&self, ctx: PromptContext) -> std::result::Result<TextStream, GatewayError>;
}

#[async_trait]
pub trait SynthesisGateway: Send + Sync {
    /// Synthesize one text chunk into a stream of audio chunks.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> std::result::Result<AudioStream, GatewayError>;
}

/// The set of downstream services one pipeline talks to
#[derive(Clone)]
pub struct Gateways {
    pub transcription: Arc<dyn TranscriptionGateway>,
    pub generation: Arc<dyn GenerationGateway>,
    pub synthesis: Arc<dyn SynthesisGateway>,
}

impl Gateways {
    /// In-process gateways for demos and tests
    pub fn loopback() -> Self {
        Self {
            transcription: Arc::new(LoopbackTranscription::new()),
            generation: Arc::new(LoopbackGeneration::new()),
            synthesis: Arc::new(LoopbackSynthesis::new()),
        }
    }
}
