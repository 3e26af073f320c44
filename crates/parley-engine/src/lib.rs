//! Call-session orchestration engine for the Parley platform.
//!
//! Owns the per-run lifecycle and turn protocol: a run is created (web or
//! phone), admitted by the concurrency gate, driven through turns against
//! the external providers with every fragment persisted in the run store,
//! and finalised exactly once — by a terminal event, an explicit hangup, or
//! the recovery sweeper.
//!
//! # Concurrency model
//!
//! Each run is driven by event-triggered invocations (an inbound webhook, an
//! inbound client message); there is no long-lived task per run. Turns within
//! one run are serialised by a per-run async mutex held across the whole
//! turn, including the provider await. Across runs nothing is ordered.
//! Status transitions go through compare-and-set updates in the store, so a
//! duplicate terminal webhook and the sweeper cannot both finalise a run.

mod error;
mod gate;
mod markup;
mod session;
mod sweeper;
mod webhook;

pub use error::EngineError;
pub use gate::ConcurrencyGate;
pub use session::{EngineSettings, SessionEngine, TurnReply};
pub use sweeper::SweepReport;
pub use webhook::{TelephonyReply, WebhookEvent};
