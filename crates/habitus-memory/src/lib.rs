//! `habitus-memory` – The Memory Store.
//!
//! Durable, confidence-scored memories about the user plus the append-only
//! log of tool executions they are mined from, both kept in one local SQLite
//! database. Every state mutation in the engine passes through here.
//!
//! # Modules
//!
//! - [`store`] – [`MemoryStore`][store::MemoryStore]: schema, memory CRUD and
//!   the atomic reinforce / weaken-then-evict updates.
//! - [`execution_log`] – the tool-execution half of [`MemoryStore`]:
//!   appending, listing and counting logged executions.

pub mod execution_log;
pub mod store;

pub use store::{MemoryStore, StoreError, WeakenOutcome};
