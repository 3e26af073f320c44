//! The provider interface consumed by the session engine.

use async_trait::async_trait;
use parley_types::Speaker;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One prior turn handed to the language provider as context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
}

/// A language-provider reply plus its reported cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedReply {
    /// The agent's next utterance, possibly carrying control markers.
    pub text: String,
    /// Provider-reported token cost for this generation.
    pub token_cost: i64,
}

/// Uniform interface to the external speech/language/telephony capabilities.
///
/// Implementations are stateless per call and must be safe to share across
/// concurrent runs (the engine holds one instance behind an `Arc`).
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Converts caller audio into text.
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError>;

    /// Generates the agent's next utterance from the conversation so far.
    async fn generate(
        &self,
        system_prompt: &str,
        context: &[ConversationTurn],
    ) -> Result<GeneratedReply, ProviderError>;

    /// Converts agent text into a playable audio reference.
    async fn synthesize(&self, text: &str) -> Result<String, ProviderError>;

    /// Places an outbound call; webhooks will arrive under `callback_base_url`.
    ///
    /// Returns the provider's call identifier.
    async fn dial(
        &self,
        phone_number: &str,
        callback_base_url: &str,
    ) -> Result<String, ProviderError>;
}
