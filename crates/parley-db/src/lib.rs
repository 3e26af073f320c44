//! Database layer for the Parley platform.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and query helpers. Every database table in Parley
//! is created through versioned migrations managed by this crate.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single-server orchestration engine needs no
//!   external database process. WAL mode allows concurrent readers with a
//!   single writer, which matches the run-store access pattern: many status
//!   reads, short transactional writes.
//! - **`r2d2` connection pool**: provides bounded connection reuse without
//!   manual lifetime management.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!`, ensuring migrations ship with the server and cannot
//!   drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings};
