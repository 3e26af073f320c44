//! Deterministic in-process provider.
//!
//! Used by the integration tests and by local development without live
//! speech/language/telephony services. Replies can be scripted in advance;
//! once the script is exhausted the provider echoes the last caller turn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley_types::Speaker;
use tokio::sync::Notify;

use crate::client::{ConversationTurn, GeneratedReply, ProviderClient};
use crate::error::ProviderError;

/// Token cost reported for every scripted generation.
const SCRIPTED_TOKEN_COST: i64 = 10;

/// A provider whose answers are fully determined by the test script.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<String>>,
    dials: Mutex<Vec<(String, String)>>,
    fail_generation: AtomicBool,
    generate_calls: AtomicU64,
    generation_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next generated reply.
    pub fn push_reply(&self, text: impl Into<String>) {
        self.replies
            .lock()
            .expect("script lock poisoned")
            .push_back(text.into());
    }

    /// Makes every subsequent generation fail with a provider API error.
    pub fn fail_generations(&self, fail: bool) {
        self.fail_generation.store(fail, Ordering::SeqCst);
    }

    /// Makes generations block inside the provider until released.
    ///
    /// Returns `(entered, release)`: `entered` is notified when a generation
    /// reaches the provider, and the generation waits on `release`. Lets a
    /// test hold a turn mid-flight while something else acts on the run.
    pub fn hold_generations(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.generation_gate.lock().expect("gate lock poisoned") =
            Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    /// Outbound dials placed so far, as `(phone_number, callback_url)` pairs.
    pub fn dials(&self) -> Vec<(String, String)> {
        self.dials.lock().expect("dial lock poisoned").clone()
    }

    /// Number of language-generation calls made so far.
    pub fn generate_call_count(&self) -> u64 {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError> {
        Ok(format!("transcribed {} bytes", audio.len()))
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        context: &[ConversationTurn],
    ) -> Result<GeneratedReply, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self
            .generation_gate
            .lock()
            .expect("gate lock poisoned")
            .clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(ProviderError::Api {
                operation: "generate",
                status: 503,
            });
        }

        let scripted = self
            .replies
            .lock()
            .expect("script lock poisoned")
            .pop_front();

        let text = scripted.unwrap_or_else(|| {
            let last_caller = context
                .iter()
                .rev()
                .find(|turn| turn.speaker == Speaker::Caller);
            match last_caller {
                Some(turn) => format!("You said: {}", turn.text),
                None => "Hello, how can I help you today?".to_string(),
            }
        });

        Ok(GeneratedReply {
            text,
            token_cost: SCRIPTED_TOKEN_COST,
        })
    }

    async fn synthesize(&self, text: &str) -> Result<String, ProviderError> {
        Ok(format!("audio://scripted/{}", text.len()))
    }

    async fn dial(
        &self,
        phone_number: &str,
        callback_base_url: &str,
    ) -> Result<String, ProviderError> {
        let mut dials = self.dials.lock().expect("dial lock poisoned");
        dials.push((phone_number.to_string(), callback_base_url.to_string()));
        Ok(format!("call-{:04}", dials.len()))
    }
}
