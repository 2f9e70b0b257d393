//! `relay gaps`: batch gap detection over recent decisions.

use anyhow::Result;

use decision_relay_core::gaps::GapReport;
use decision_relay_core::models::Gap;

use crate::config::{check_days, Config};
use crate::db;
use crate::orchestrator::Orchestrator;

pub async fn run_gaps(config: &Config, days: Option<i64>, save: bool, json: bool) -> Result<()> {
    let window_days = match days {
        Some(d) => check_days(d)?,
        None => config.retrieval.window_days,
    };

    let pool = db::connect(config).await?;
    let orchestrator = Orchestrator::from_pool(config, pool.clone())?;

    let report = orchestrator.detect_gaps(window_days).await?;
    let summary = if save {
        Some(orchestrator.persist_gaps(&report).await?)
    } else {
        None
    };

    if json {
        let out = serde_json::json!({ "window_days": window_days, "report": report, "saved": summary });
        println!("{}", serde_json::to_string_pretty(&out)?);
        pool.close().await;
        return Ok(());
    }

    print_report(&report, window_days);
    if let Some(summary) = summary {
        println!(
            "saved: {} new, {} already stored, {} skipped",
            summary.created, summary.existing, summary.skipped
        );
    }

    pool.close().await;
    Ok(())
}

fn print_report(report: &GapReport, window_days: i64) {
    println!("gaps (last {} days)", window_days);
    if report.is_empty() {
        println!("  none found");
        println!();
        return;
    }

    print_section("missing stakeholders", &report.missing_stakeholders);
    print_section("conflicts", &report.conflicts);
    print_section("broken dependencies", &report.broken_dependencies);
    println!();
}

fn print_section(title: &str, gaps: &[Gap]) {
    if gaps.is_empty() {
        return;
    }
    println!();
    println!("  {} ({}):", title, gaps.len());
    for gap in gaps {
        println!("    [{}] @{}: {}", gap.severity.as_str(), gap.assignee_id, gap.description);
        println!("      -> {}", gap.recommendation);
    }
}
