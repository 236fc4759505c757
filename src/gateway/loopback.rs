//! Deterministic in-process gateways
//!
//! These back the "in-process calls" transport: no network, no models.
//! The demo binary runs against them and the integration tests use them
//! to exercise the full pipeline.

use crate::gateway::{
    AudioChunk, AudioStream, GatewayError, GenerationGateway, PromptContext, SynthesisGateway,
    TextChunk, TextStream, TranscriptionGateway,
};
use async_stream::stream;
use async_trait::async_trait;
use std::time::Duration;

/// Treats the audio payload as UTF-8 text. Rejects non-UTF-8 input the
/// way a real engine rejects malformed audio.
#[derive(Debug, Default)]
pub struct LoopbackTranscription;

impl LoopbackTranscription {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TranscriptionGateway for LoopbackTranscription {
    async fn transcribe(
        &self,
        audio: &[u8],
        _language_hint: Option<&str>,
    ) -> std::result::Result<String, GatewayError> {
        let text = std::str::from_utf8(audio)
            .map_err(|_| GatewayError::Terminal("malformed audio payload".into()))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(GatewayError::Terminal("empty utterance".into()));
        }
        Ok(text.to_string())
    }
}

/// Streams a templated response word by word, with an optional delay
/// between chunks to mimic token pacing.
#[derive(Debug, Default)]
pub struct LoopbackGeneration {
    chunk_delay: Option<Duration>,
}

impl LoopbackGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pause between chunks, useful for exercising barge-in
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

#[async_trait]
impl GenerationGateway for LoopbackGeneration {
    async fn generate(&self, ctx: PromptContext) -> std::result::Result<TextStream, GatewayError> {
        let response = format!("You said: {}. Noted.", ctx.user_text);
        let delay = self.chunk_delay;

        let words: Vec<String> = response
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        let last = words.len().saturating_sub(1);

        Ok(Box::pin(stream! {
            for (i, word) in words.into_iter().enumerate() {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(TextChunk { text: word, is_final: i == last });
            }
        }))
    }
}

/// Produces synthetic PCM-shaped bytes derived from the input text.
#[derive(Debug, Default)]
pub struct LoopbackSynthesis {
    chunk_delay: Option<Duration>,
}

impl LoopbackSynthesis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }
}

#[async_trait]
impl SynthesisGateway for LoopbackSynthesis {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
    ) -> std::result::Result<AudioStream, GatewayError> {
        if voice_id.is_empty() {
            return Err(GatewayError::Terminal("unknown voice".into()));
        }
        // Two chunks per unit: enough to exercise stream assembly
        let half = text.len().div_ceil(2).max(1);
        let first = vec![0x55u8; half];
        let second = vec![0xAAu8; text.len().saturating_sub(half).max(1)];
        let delay = self.chunk_delay;

        Ok(Box::pin(stream! {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            yield Ok(AudioChunk { data: first, is_final: false });
            yield Ok(AudioChunk { data: second, is_final: true });
        }))
    }
}
