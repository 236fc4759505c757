//! Personality profiles supplying system prompt and voice selection
//!
//! Profiles are owned by an external store; this core only reads them.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// External configuration for generation and synthesis of one persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityProfile {
    /// Profile identifier, referenced from sessions
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// System prompt prepended to every generation request
    pub system_prompt: String,

    /// Voice identifier passed to the synthesis gateway
    pub voice_id: String,

    /// Sampling temperature for generation
    pub temperature: f32,

    /// Optional greeting spoken when a conversation starts
    pub greeting: Option<String>,
}

impl PersonalityProfile {
    pub fn new(id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            system_prompt: system_prompt.into(),
            voice_id: "default".to_string(),
            temperature: 0.7,
            greeting: None,
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = Some(greeting.into());
        self
    }
}

/// Read-only profile lookup, backed by whatever store the surrounding
/// system configures.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch(&self, profile_id: &str) -> Option<PersonalityProfile>;
}

/// In-memory profile store for in-process deployments and tests
#[derive(Debug, Default)]
pub struct StaticProfileStore {
    profiles: RwLock<HashMap<String, PersonalityProfile>>,
}

impl StaticProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a profile, replacing any existing one with the same id
    pub fn register(&self, profile: PersonalityProfile) {
        self.profiles.write().insert(profile.id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }
}

#[async_trait]
impl ProfileStore for StaticProfileStore {
    async fn fetch(&self, profile_id: &str) -> Option<PersonalityProfile> {
        self.profiles.read().get(profile_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_fetch() {
        let store = StaticProfileStore::new();
        store.register(PersonalityProfile::new("helper", "You are helpful.").with_voice("en-1"));

        let profile = store.fetch("helper").await.unwrap();
        assert_eq!(profile.voice_id, "en-1");
        assert!(store.fetch("missing").await.is_none());
    }
}
