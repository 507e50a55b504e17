//! LLM provider abstraction.
//!
//! The chat session core and the post-processing workers talk to the hosted
//! model only through the [`ReplyGenerator`] trait, so tests can substitute
//! a scripted generator and the provider can be swapped without touching the
//! session code.

mod openai;

pub use openai::OpenAiProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One prior turn handed to the generator as history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// Error from a provider call.
///
/// Deliberately a distinct type from the session-inactive condition: a
/// failing provider is an upstream fault, not a conversation state.
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    pub status_code: Option<u16>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.provider, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Unified interface for LLM-backed reply generation.
///
/// Used for the main conversational turn and for every post-processing
/// analysis, each with its own system prompt. No retry or backoff happens
/// behind this trait.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    /// Get the generator name.
    fn name(&self) -> &str;

    /// Generate a reply to `user_message` given a system prompt and prior
    /// history.
    async fn generate_reply(
        &self,
        system_prompt: &str,
        history: &[ChatTurn],
        user_message: &str,
    ) -> Result<String, ProviderError>;
}
