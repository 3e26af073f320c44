//! Provider Client for the Parley platform.
//!
//! A uniform interface to the three external capabilities the orchestration
//! engine consumes — speech-to-text, language generation, and
//! text-to-speech/telephony dial — plus an HTTP implementation and a
//! deterministic scripted implementation for tests and local development.
//!
//! The providers are opaque: this crate defines only the call shapes and the
//! failure taxonomy. Transient transport failures (connect errors, timeouts)
//! are retried a small bounded number of times with doubling backoff; an
//! error response from the provider itself is never retried, because the
//! provider already saw the request.

mod client;
mod error;
mod http;
mod scripted;

pub use client::{ConversationTurn, GeneratedReply, ProviderClient};
pub use error::ProviderError;
pub use http::{HttpProviderClient, HttpProviderSettings};
pub use scripted::ScriptedProvider;
