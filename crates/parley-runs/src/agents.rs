//! Agent directory lookups.
//!
//! Agent rows are written by the external agent CRUD service; the engine
//! only reads them to authorize run creation and to locate the per-owner
//! concurrency ceiling.

use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::RunStoreError;

/// An agent as seen by the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    /// Public agent identifier.
    pub agent_id: String,
    /// The owning account; the concurrency-accounting key.
    pub owner_id: String,
    /// Display name.
    pub display_name: String,
    /// System prompt prepended to every language-generation call.
    pub system_prompt: String,
    /// Opening line spoken before the first caller turn.
    pub greeting: String,
    /// Per-owner concurrency ceiling; `None` means use the configured default.
    pub max_concurrent_runs: Option<u32>,
}

/// Looks up an agent by its public ID. Returns `None` if it does not exist.
pub fn get_agent(conn: &Connection, agent_id: &str) -> Result<Option<Agent>, RunStoreError> {
    let agent = conn
        .query_row(
            "SELECT agent_id, owner_id, display_name, system_prompt, greeting, max_concurrent_runs
             FROM agents
             WHERE agent_id = ?1",
            [agent_id],
            |row| {
                Ok(Agent {
                    agent_id: row.get(0)?,
                    owner_id: row.get(1)?,
                    display_name: row.get(2)?,
                    system_prompt: row.get(3)?,
                    greeting: row.get(4)?,
                    max_concurrent_runs: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(agent)
}
