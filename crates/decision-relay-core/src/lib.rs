//! # Decision Relay Core
//!
//! Runtime-agnostic logic for Decision Relay: data models, entity
//! extraction patterns, the context matcher, decision classification,
//! buffer and store abstractions with in-memory backends, hybrid retrieval,
//! gap detection, reply templates, and pipeline counters.
//!
//! This crate contains no tokio, sqlx, or network I/O. The `decision-relay`
//! app crate supplies SQLite backends, LLM and embedding providers, and the
//! ingest orchestrator.

pub mod buffer;
pub mod clock;
pub mod decision;
pub mod directory;
pub mod embedding;
pub mod entities;
pub mod error;
pub mod gaps;
pub mod matcher;
pub mod models;
pub mod respond;
pub mod retrieval;
pub mod stats;
pub mod store;

pub use error::{CoreError, ErrorCategory, Result};
