//! Database statistics and health overview.
//!
//! A quick summary of what has been captured: decision counts by type,
//! embedding coverage, stored gaps, and live buffer channels. Used by
//! `relay stats`.

use anyhow::Result;
use sqlx::Row;

use decision_relay_core::store::DecisionStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteDecisionStore;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteDecisionStore::new(pool.clone());

    let total_decisions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM decisions")
        .fetch_one(&pool)
        .await?;
    let threads: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT thread_id) FROM thread_participants")
        .fetch_one(&pool)
        .await?;
    let last_decision: Option<i64> = sqlx::query_scalar("SELECT MAX(ts) FROM decisions")
        .fetch_one(&pool)
        .await?;
    let counts = store.embedding_counts().await?;

    let now_ms = chrono::Utc::now().timestamp_millis();
    let live_channels: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM buffer_channels WHERE expires_at > ?")
        .bind(now_ms)
        .fetch_one(&pool)
        .await?;
    let buffered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM buffer_messages m \
         JOIN buffer_channels c ON c.channel_id = m.channel_id \
         WHERE c.expires_at > ?",
    )
    .bind(now_ms)
    .fetch_one(&pool)
    .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Decision Relay — Database Stats");
    println!("===============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Decisions:   {}", total_decisions);
    println!("  Threads:     {}", threads);
    println!(
        "  Last:        {}",
        last_decision
            .map(|ms| format_ts_relative(ms / 1000))
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Embedded:    {} / {} ({}%), {} pending, {} failed",
        counts.embedded,
        counts.total(),
        if counts.total() > 0 {
            (counts.embedded * 100) / counts.total()
        } else {
            0
        },
        counts.pending,
        counts.failed
    );

    let type_rows = sqlx::query(
        "SELECT decision_type, COUNT(*) AS n FROM decisions GROUP BY decision_type ORDER BY n DESC",
    )
    .fetch_all(&pool)
    .await?;
    if !type_rows.is_empty() {
        println!();
        println!("  By type:");
        for row in &type_rows {
            let decision_type: String = row.get("decision_type");
            let n: i64 = row.get("n");
            println!("    {:<24} {:>6}", decision_type, n);
        }
    }

    let gap_rows = sqlx::query(
        "SELECT gap_type, severity, COUNT(*) AS n FROM gaps GROUP BY gap_type, severity ORDER BY gap_type, severity",
    )
    .fetch_all(&pool)
    .await?;
    println!();
    if gap_rows.is_empty() {
        println!("  Gaps:        0");
    } else {
        println!("  Gaps:");
        for row in &gap_rows {
            let gap_type: String = row.get("gap_type");
            let severity: String = row.get("severity");
            let n: i64 = row.get("n");
            println!("    {:<24} {:<10} {:>6}", gap_type, severity, n);
        }
    }

    println!();
    println!("  Buffer:      {} live channel(s), {} message(s)", live_channels, buffered);
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
