//! HTTP implementation of the provider interface.
//!
//! Each call carries a per-request timeout and a bounded retry loop with
//! doubling backoff. Only transport-level failures are retried; a non-2xx
//! answer means the provider saw the request, so it is surfaced immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::{ConversationTurn, GeneratedReply, ProviderClient};
use crate::error::ProviderError;

/// Default per-call deadline.
const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Default number of retries after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 2;

/// First backoff step; doubles per retry.
const BACKOFF_BASE_MS: u64 = 250;

/// Connection settings for the HTTP provider client.
#[derive(Debug, Clone)]
pub struct HttpProviderSettings {
    /// Base URL of the provider gateway (no trailing slash).
    pub base_url: String,
    /// Bearer token sent with every request, if configured.
    pub api_key: Option<String>,
    /// Per-call deadline in milliseconds.
    pub timeout_ms: u64,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
}

impl Default for HttpProviderSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090".to_string(),
            api_key: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Provider client speaking JSON over HTTP to a provider gateway.
#[derive(Debug)]
pub struct HttpProviderClient {
    settings: HttpProviderSettings,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    system_prompt: &'a str,
    turns: &'a [ConversationTurn],
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    text: String,
    token_cost: i64,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    audio_url: String,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

#[derive(Debug, Serialize)]
struct DialRequest<'a> {
    to: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct DialResponse {
    call_id: String,
}

impl HttpProviderClient {
    pub fn new(settings: HttpProviderSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.timeout_ms))
            .build()
            // Building a client with static settings only fails on a broken
            // TLS backend, which is unrecoverable at startup anyway.
            .unwrap_or_default();
        Self { settings, http }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    fn classify(&self, operation: &'static str, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout {
                operation,
                timeout_ms: self.settings.timeout_ms,
            }
        } else if err.is_connect() || err.is_request() {
            ProviderError::Transport {
                operation,
                message: err.to_string(),
            }
        } else {
            ProviderError::InvalidResponse {
                operation,
                message: err.to_string(),
            }
        }
    }

    /// Sends a request, retrying transient failures with doubling backoff.
    ///
    /// `build` produces a fresh request per attempt (request bodies are not
    /// reusable across sends).
    async fn send_with_retry<F>(
        &self,
        operation: &'static str,
        build: F,
    ) -> Result<reqwest::Response, ProviderError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut backoff = Duration::from_millis(BACKOFF_BASE_MS);
        let mut attempt = 0u32;

        loop {
            let result = self.apply_auth(build()).send().await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    return Err(ProviderError::Api {
                        operation,
                        status: status.as_u16(),
                    });
                }
                Err(err) => {
                    let classified = self.classify(operation, err);
                    if !classified.is_transient() || attempt >= self.settings.max_retries {
                        return Err(classified);
                    }
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %classified,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::InvalidResponse {
                operation,
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, ProviderError> {
        let url = self.url("/v1/transcribe");
        let audio = audio.to_vec();
        let response = self
            .send_with_retry("transcribe", || {
                self.http
                    .post(&url)
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(audio.clone())
            })
            .await?;
        let parsed: TranscribeResponse = Self::parse("transcribe", response).await?;
        Ok(parsed.text)
    }

    async fn generate(
        &self,
        system_prompt: &str,
        context: &[ConversationTurn],
    ) -> Result<GeneratedReply, ProviderError> {
        let url = self.url("/v1/generate");
        let body = GenerateRequest {
            system_prompt,
            turns: context,
        };
        let response = self
            .send_with_retry("generate", || self.http.post(&url).json(&body))
            .await?;
        let parsed: GenerateResponse = Self::parse("generate", response).await?;
        Ok(GeneratedReply {
            text: parsed.text,
            token_cost: parsed.token_cost,
        })
    }

    async fn synthesize(&self, text: &str) -> Result<String, ProviderError> {
        let url = self.url("/v1/synthesize");
        let body = SynthesizeRequest { text };
        let response = self
            .send_with_retry("synthesize", || self.http.post(&url).json(&body))
            .await?;
        let parsed: SynthesizeResponse = Self::parse("synthesize", response).await?;
        Ok(parsed.audio_url)
    }

    async fn dial(
        &self,
        phone_number: &str,
        callback_base_url: &str,
    ) -> Result<String, ProviderError> {
        let url = self.url("/v1/calls");
        let body = DialRequest {
            to: phone_number,
            callback_url: callback_base_url,
        };
        let response = self
            .send_with_retry("dial", || self.http.post(&url).json(&body))
            .await?;
        let parsed: DialResponse = Self::parse("dial", response).await?;
        Ok(parsed.call_id)
    }
}
