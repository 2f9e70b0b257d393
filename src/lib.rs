//! # Decision Relay
//!
//! Captures engineering decisions from team chat, re-injects related recent
//! context when a topic comes back, and flags people who were left out of
//! decisions that affect them.
//!
//! The runtime-agnostic logic (models, extraction patterns, matcher,
//! retrieval, gap detection) lives in `decision-relay-core`. This crate
//! wires it to SQLite, OpenAI-compatible LLM and embedding endpoints, and
//! the `relay` CLI.
//!
//! ## Architecture
//!
//! ```text
//!  chat message
//!       │
//!       ▼
//! ┌─────────────┐   ┌──────────────┐   ┌─────────────┐
//! │  Extractor  │──▶│ Orchestrator │──▶│   SQLite    │
//! │ LLM/pattern │   │ match + gaps │   │ decisions,  │
//! └─────────────┘   └──────┬───────┘   │ gaps, buffer│
//!                          │           └──────┬──────┘
//!                          ▼                  ▼
//!                     reply text       hybrid retrieval
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! relay init
//! relay ingest hw alice "REQ-245 motor torque changed from 2.0Nm to 2.5Nm"
//! relay ingest hw bob "what are the motor power requirements?"
//! relay search --user bob --component motor
//! relay gaps --save
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite decision and gap store |
//! | [`sqlite_buffer`] | SQLite-backed live context buffer |
//! | [`llm`] | Chat-completions client |
//! | [`extract`] | LLM extraction and batch extraction |
//! | [`respond`] | LLM reply synthesis |
//! | [`embedding`] | OpenAI embedding backend |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`orchestrator`] | Message-ingest pipeline |
//! | [`search`] | `relay search` |
//! | [`gaps_cmd`] | `relay gaps` |
//! | [`import`] | `relay import` |
//! | [`stats`] | `relay stats` |

pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod gaps_cmd;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod orchestrator;
pub mod respond;
pub mod search;
pub mod sqlite_buffer;
pub mod sqlite_store;
pub mod stats;
