//! # Decision Relay CLI (`relay`)
//!
//! The `relay` binary drives Decision Relay from the command line: database
//! setup, single-message and bulk ingest, decision search, gap detection,
//! embedding backfill, and a database overview.
//!
//! ## Usage
//!
//! ```bash
//! relay --config ./config/relay.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `relay init` | Create the SQLite database and run schema migrations |
//! | `relay ingest <channel> <user> <text>` | Run one message through the pipeline |
//! | `relay import <file.jsonl>` | Replay a chat export through the pipeline |
//! | `relay search [query]` | Hybrid decision search for a user |
//! | `relay gaps` | Detect knowledge gaps over recent decisions |
//! | `relay embed pending` | Backfill decision embeddings |
//! | `relay embed reset-failed` | Retry decisions whose embedding failed |
//! | `relay stats` | Summarize stored decisions, gaps, and buffers |
//!
//! Logs go to stderr. Set `RELAY_LOG` (or `RUST_LOG`) to change the filter,
//! e.g. `RELAY_LOG=decision_relay=debug`.

mod config;
mod db;
mod embed_cmd;
mod embedding;
mod extract;
mod gaps_cmd;
mod import;
mod llm;
mod migrate;
mod orchestrator;
mod respond;
mod search;
mod sqlite_buffer;
mod sqlite_store;
mod stats;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Decision Relay CLI: captures engineering decisions from team chat,
/// re-injects related context, and flags excluded stakeholders.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/relay.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "relay",
    about = "Decision Relay: decision capture, context injection, and knowledge-gap detection for team chat",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/relay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Process one chat message.
    ///
    /// Extracts entities, stores a decision if the message is
    /// decision-worthy, checks the channel buffer for related context, and
    /// prints the result including any reply.
    Ingest {
        channel: String,
        user: String,
        text: String,

        /// Thread the message belongs to. Defaults to a new thread.
        #[arg(long)]
        thread: Option<String>,

        /// Message timestamp (RFC 3339). Defaults to now.
        #[arg(long)]
        at: Option<String>,

        #[arg(long)]
        message_id: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Replay a JSON Lines chat export through the pipeline.
    Import {
        path: PathBuf,
    },

    /// Search stored decisions on behalf of a user.
    ///
    /// Without a query the newest matching decisions are returned. With a
    /// query and an embedding provider, candidates are re-ranked by
    /// semantic similarity.
    Search {
        query: Option<String>,

        /// User the search runs for. Their owned components are the default
        /// component filter.
        #[arg(long, default_value = "")]
        user: String,

        /// Restrict to decisions touching this component. Repeatable.
        #[arg(long = "component")]
        components: Vec<String>,

        #[arg(long)]
        author: Option<String>,

        /// Decision type, e.g. `requirement_change` or `approval`.
        #[arg(long = "type")]
        decision_type: Option<String>,

        /// Lookback window in days.
        #[arg(long)]
        days: Option<i64>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        json: bool,
    },

    /// Detect missing stakeholders, conflicts, and broken dependencies.
    Gaps {
        /// Lookback window in days. Defaults to `[retrieval].window_days`.
        #[arg(long)]
        days: Option<i64>,

        /// Store detected gaps. Gaps already stored are not duplicated.
        #[arg(long)]
        save: bool,

        #[arg(long)]
        json: bool,
    },

    /// Manage decision embeddings.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed pending decisions, oldest first.
    Pending {
        /// Maximum number of decisions to embed in this run.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Move failed decisions back to pending.
    ResetFailed,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("RELAY_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_timestamp(at: Option<&str>) -> Result<DateTime<Utc>> {
    match at {
        Some(s) => Ok(DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("--at: invalid RFC 3339 timestamp '{}'", s))?
            .with_timezone(&Utc)),
        None => Ok(Utc::now()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            channel,
            user,
            text,
            thread,
            at,
            message_id,
            json,
        } => {
            let mut request = orchestrator::IngestRequest::new(channel, user, text, parse_timestamp(at.as_deref())?);
            if let Some(thread) = thread {
                request = request.thread(thread);
            }
            if let Some(id) = message_id {
                request = request.message_id(id);
            }

            let pool = db::connect(&cfg).await?;
            let relay = orchestrator::Orchestrator::from_pool(&cfg, pool.clone())?;
            let result = relay.process_message(request).await;
            pool.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("message {}", result.message_id);
                println!("  entities: {}", result.entities_extracted);
                match &result.decision_id {
                    Some(id) => println!("  decision: {}", id),
                    None => println!("  decision: none"),
                }
                println!("  match: {} ({:.2})", result.tier, result.score);
                if result.gap_created {
                    println!("  gaps: {}", result.gap_ids.join(", "));
                }
                if let Some(reply) = &result.response {
                    println!("  reply: {}", reply);
                }
                if result.timed_out {
                    println!("  timed out after {:.0}ms", result.processing_time_ms);
                }
                if let Some(error) = &result.error {
                    println!("  error: {}", error);
                }
            }
        }
        Commands::Import { path } => {
            import::run_import(&cfg, &path).await?;
        }
        Commands::Search {
            query,
            user,
            components,
            author,
            decision_type,
            days,
            limit,
            json,
        } => {
            let args = search::SearchArgs {
                user_id: user,
                query,
                components,
                author,
                decision_type,
                days,
                limit,
                json,
            };
            search::run_search(&cfg, &args).await?;
        }
        Commands::Gaps { days, save, json } => {
            gaps_cmd::run_gaps(&cfg, days, save, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending { limit } => {
                embed_cmd::run_embed_pending(&cfg, limit).await?;
            }
            EmbedAction::ResetFailed => {
                embed_cmd::run_embed_reset_failed(&cfg).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
    }

    Ok(())
}
