//! Shared types, error definitions, and constants for the Parley platform.
//!
//! This crate provides the foundational types used across all Parley crates:
//! the run lifecycle enums (status, channel, disposition), transcript speaker
//! roles, and their canonical string forms as stored in SQLite.
//!
//! No crate in the workspace depends on anything *except* `parley-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};

/// The channel over which a run is conducted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    /// Text turns submitted directly by a web client.
    #[serde(rename = "WEB")]
    Web,
    /// Audio turns mediated by the telephony provider's webhooks.
    #[serde(rename = "PHONE")]
    Phone,
}

impl Channel {
    /// Returns the canonical string label for this channel.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::Phone => "PHONE",
        }
    }

    /// Returns the run-number prefix for this channel (`WEB-` / `PH-`).
    pub fn run_number_prefix(self) -> &'static str {
        match self {
            Self::Web => "WEB",
            Self::Phone => "PH",
        }
    }

    /// Attempts to convert a stored label back to a `Channel`.
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "WEB" => Some(Self::Web),
            "PHONE" => Some(Self::Phone),
            _ => None,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run.
///
/// Transitions only move forward: `Pending → InProgress → {Completed, Failed}`.
/// The store enforces this with compare-and-set updates; no code path may
/// write a status without naming the status it expects to replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created but not yet driving turns.
    #[serde(rename = "PENDING")]
    Pending,
    /// The only state in which turns occur.
    #[serde(rename = "IN_PROGRESS")]
    InProgress,
    /// Terminal: the conversation ran and ended by protocol.
    #[serde(rename = "COMPLETED")]
    Completed,
    /// Terminal: the run never converged or an external party broke it.
    #[serde(rename = "FAILED")]
    Failed,
}

impl RunStatus {
    /// Returns the canonical string label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Attempts to convert a stored label back to a `RunStatus`.
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The human on the call (or the web client's user).
    #[serde(rename = "CALLER")]
    Caller,
    /// The AI agent.
    #[serde(rename = "AGENT")]
    Agent,
}

impl Speaker {
    /// Returns the canonical string label for this speaker.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Caller => "CALLER",
            Self::Agent => "AGENT",
        }
    }

    /// Attempts to convert a stored label back to a `Speaker`.
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "CALLER" => Some(Self::Caller),
            "AGENT" => Some(Self::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal classification of a run's outcome.
///
/// Written exactly once, at the terminal transition, and never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// The agent ended the conversation normally.
    Completed,
    /// The caller hung up (explicit web hangup or telephony `completed`).
    CallerHangup,
    /// The agent requested a transfer to a human.
    TransferRequested,
    /// The configured turn ceiling was reached.
    MaxTurnsReached,
    /// The callee never answered the outbound dial.
    NoAnswer,
    /// The callee's line was busy.
    Busy,
    /// An external provider call failed after bounded retries.
    ProviderError,
    /// The recovery sweeper terminated a stalled run.
    StuckRecovered,
}

impl Disposition {
    /// Returns the canonical string label for this disposition.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CallerHangup => "caller_hangup",
            Self::TransferRequested => "transfer_requested",
            Self::MaxTurnsReached => "max_turns_reached",
            Self::NoAnswer => "no_answer",
            Self::Busy => "busy",
            Self::ProviderError => "provider_error",
            Self::StuckRecovered => "stuck_recovered",
        }
    }

    /// Attempts to convert a stored label back to a `Disposition`.
    pub fn from_str_label(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "caller_hangup" => Some(Self::CallerHangup),
            "transfer_requested" => Some(Self::TransferRequested),
            "max_turns_reached" => Some(Self::MaxTurnsReached),
            "no_answer" => Some(Self::NoAnswer),
            "busy" => Some(Self::Busy),
            "provider_error" => Some(Self::ProviderError),
            "stuck_recovered" => Some(Self::StuckRecovered),
            _ => None,
        }
    }

    /// The terminal status a run finalised with this disposition lands in.
    ///
    /// `Completed` covers conversations that ran and ended by protocol;
    /// `Failed` covers runs that never converged or were broken externally.
    pub fn terminal_status(self) -> RunStatus {
        match self {
            Self::Completed
            | Self::CallerHangup
            | Self::TransferRequested
            | Self::MaxTurnsReached => RunStatus::Completed,
            Self::NoAnswer | Self::Busy | Self::ProviderError | Self::StuckRecovered => {
                RunStatus::Failed
            }
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
