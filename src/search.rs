//! `relay search`: hybrid decision retrieval from the command line.

use anyhow::{anyhow, Result};
use std::collections::BTreeSet;

use decision_relay_core::models::DecisionType;
use decision_relay_core::retrieval::RetrievalFilters;

use crate::config::{check_days, Config};
use crate::db;
use crate::orchestrator::Orchestrator;

/// Parsed `relay search` arguments.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub user_id: String,
    pub query: Option<String>,
    pub components: Vec<String>,
    pub author: Option<String>,
    pub decision_type: Option<String>,
    pub days: Option<i64>,
    pub limit: Option<usize>,
    pub json: bool,
}

impl SearchArgs {
    fn filters(&self) -> Result<RetrievalFilters> {
        let decision_type = self
            .decision_type
            .as_deref()
            .map(|s| s.parse::<DecisionType>())
            .transpose()
            .map_err(|e| anyhow!("--type: {}", e))?;

        Ok(RetrievalFilters {
            components: self
                .components
                .iter()
                .map(|c| c.trim().to_lowercase())
                .filter(|c| !c.is_empty())
                .collect::<BTreeSet<_>>(),
            author_id: self.author.clone(),
            decision_type,
            window_days: self.days.map(check_days).transpose()?,
        })
    }
}

pub async fn run_search(config: &Config, args: &SearchArgs) -> Result<()> {
    let filters = args.filters()?;
    let limit = args.limit.unwrap_or(config.retrieval.default_limit);

    let pool = db::connect(config).await?;
    let orchestrator = Orchestrator::from_pool(config, pool.clone())?;

    let (results, stats) = orchestrator
        .hybrid_search(&args.user_id, args.query.as_deref(), &filters, limit)
        .await?;

    if args.json {
        let out = serde_json::json!({ "results": results, "stats": stats });
        println!("{}", serde_json::to_string_pretty(&out)?);
        pool.close().await;
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.similarity_score,
            result.decision_type,
            result.author_id
        );
        println!("    date: {}", result.timestamp.format("%Y-%m-%d %H:%M"));
        if !result.affected_components.is_empty() {
            println!("    components: {}", join(&result.affected_components));
        }
        if !result.referenced_requirements.is_empty() {
            println!("    requirements: {}", join(&result.referenced_requirements));
        }
        println!("    text: \"{}\"", result.text.replace('\n', " ").trim());
        println!("    thread: {}", result.thread_id);
        println!("    id: {}", result.decision_id);
        println!();
    }

    println!(
        "{} result(s) from {} candidate(s), {} in {:.1}ms{}",
        stats.final_results,
        stats.candidates_found,
        stats.query_type.as_str(),
        stats.total_ms,
        if stats.budget_exceeded {
            format!(" (over {}ms budget)", stats.budget_ms)
        } else {
            String::new()
        }
    );

    pool.close().await;
    Ok(())
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_normalize_components() {
        let args = SearchArgs {
            user_id: "bob".into(),
            components: vec![" Motor ".into(), "".into(), "pcb".into()],
            decision_type: Some("approval".into()),
            days: Some(7),
            ..Default::default()
        };
        let filters = args.filters().unwrap();
        assert_eq!(
            filters.components.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["motor", "pcb"]
        );
        assert_eq!(filters.decision_type, Some(DecisionType::Approval));
        assert_eq!(filters.window_days, Some(7));
    }

    #[test]
    fn test_filters_reject_unknown_type() {
        let args = SearchArgs {
            decision_type: Some("memo".into()),
            ..Default::default()
        };
        assert!(args.filters().is_err());
    }

    #[test]
    fn test_filters_reject_empty_window() {
        let args = SearchArgs {
            days: Some(0),
            ..Default::default()
        };
        let err = args.filters().unwrap_err();
        assert!(err.to_string().contains("--days"));
    }
}
