//! Entity-overlap scoring that gates context injection.
//!
//! Evaluation is tiered and ordered; the first tier that matches wins and
//! later tiers are never consulted:
//!
//! | Order | Signal | Tier | Score |
//! |-------|--------|------|-------|
//! | 1 | shared requirement IDs | `high` | 2.0 × count |
//! | 2 | ≥ 2 shared components | `high` | 1.5 × count |
//! | 2 | 1 shared core component | `high` | 1.5 |
//! | 2 | 1 shared other component | `medium` | 1.0 |
//! | 3 | ≥ 2 shared topics | `medium` | 0.8 × count |
//! | 4 | synonym similarity ≥ 0.6 | `medium` | similarity |
//! | 5 | nothing | `none` | 0 |
//!
//! Everything here is pure: no I/O, no clocks, no randomness.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::models::{ContextMessage, ExtractedEntities};

/// Components whose single-match overlap is strong enough for `high`.
pub const CORE_COMPONENTS: &[&str] = &["motor", "pcb", "firmware", "power_supply"];

/// Minimum synonym similarity that earns a `medium` tier.
pub const SYNONYM_THRESHOLD: f64 = 0.6;

const SYNONYMS: &[(&str, &[&str])] = &[
    ("thermal", &["heat", "temperature", "cooling", "dissipation"]),
    ("power", &["supply", "voltage", "current", "battery", "electrical"]),
    ("motor", &["actuator", "drive", "stepper", "servo"]),
    ("pcb", &["board", "circuit", "layout"]),
    ("firmware", &["software", "code", "programming"]),
    ("testing", &["validation", "qa", "verification"]),
];

/// Discrete confidence bucket. Ordered `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    None,
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(CoreError::Config(format!(
                "unknown tier '{}'. Must be high, medium, low, or none.",
                other
            ))),
        }
    }
}

/// Result of scoring one message against buffered context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Overlap {
    pub tier: Tier,
    pub score: f64,
}

impl Overlap {
    pub const NONE: Overlap = Overlap {
        tier: Tier::None,
        score: 0.0,
    };

    fn new(tier: Tier, score: f64) -> Self {
        Self { tier, score }
    }
}

/// A buffered message that individually matched the new message.
#[derive(Debug, Clone)]
pub struct ContextMatch {
    pub message: ContextMessage,
    pub overlap: Overlap,
}

/// Score `new` against the union of all buffered entity sets.
pub fn overlap(new: &ExtractedEntities, buffered: &[&ExtractedEntities]) -> Overlap {
    if buffered.is_empty() {
        return Overlap::NONE;
    }

    let mut reqs: BTreeSet<&str> = BTreeSet::new();
    let mut components: BTreeSet<&str> = BTreeSet::new();
    let mut topics: BTreeSet<&str> = BTreeSet::new();
    for e in buffered {
        reqs.extend(e.requirement_ids.iter().map(String::as_str));
        components.extend(e.components.iter().map(String::as_str));
        topics.extend(e.topics.iter().map(String::as_str));
    }

    let req_matches = new
        .requirement_ids
        .iter()
        .filter(|r| reqs.contains(r.as_str()))
        .count();
    if req_matches > 0 {
        return Overlap::new(Tier::High, 2.0 * req_matches as f64);
    }

    let shared_components: Vec<&str> = new
        .components
        .iter()
        .map(String::as_str)
        .filter(|c| components.contains(c))
        .collect();
    match shared_components.len() {
        0 => {}
        1 => {
            return if CORE_COMPONENTS.contains(&shared_components[0]) {
                Overlap::new(Tier::High, 1.5)
            } else {
                Overlap::new(Tier::Medium, 1.0)
            };
        }
        n => return Overlap::new(Tier::High, 1.5 * n as f64),
    }

    let topic_matches = new
        .topics
        .iter()
        .filter(|t| topics.contains(t.as_str()))
        .count();
    if topic_matches >= 2 {
        return Overlap::new(Tier::Medium, 0.8 * topic_matches as f64);
    }

    let similarity = synonym_similarity(&new.components, &components);
    if similarity >= SYNONYM_THRESHOLD {
        return Overlap::new(Tier::Medium, similarity);
    }

    Overlap::NONE
}

/// Decide whether context should be injected for `new`.
///
/// Rejects before scoring when `new` carries no requirement, component,
/// or topic entities.
pub fn should_inject(new: &ExtractedEntities, buffered: &[&ExtractedEntities], threshold: Tier) -> bool {
    if new.has_no_match_signal() {
        return false;
    }
    let result = overlap(new, buffered);
    result.tier >= threshold && result.tier != Tier::None && result.score > 0.0
}

/// Score each buffered message on its own and keep those at `medium` or
/// better, newest first as given.
pub fn matching_messages(new: &ExtractedEntities, buffer: &[ContextMessage]) -> Vec<ContextMatch> {
    buffer
        .iter()
        .filter_map(|msg| {
            let o = overlap(new, &[&msg.entities]);
            (o.tier >= Tier::Medium).then(|| ContextMatch {
                message: msg.clone(),
                overlap: o,
            })
        })
        .collect()
}

fn synonyms_of(term: &str) -> &'static [&'static str] {
    SYNONYMS
        .iter()
        .find(|(k, _)| *k == term)
        .map(|(_, v)| *v)
        .unwrap_or(&[])
}

/// Average pairwise similarity: 1.0 for identical terms, 0.7 for synonyms.
fn synonym_similarity(new: &BTreeSet<String>, buffered: &BTreeSet<&str>) -> f64 {
    let mut matches = 0.0;
    let mut comparisons = 0usize;

    for a in new {
        let a_syn = synonyms_of(a);
        for b in buffered {
            comparisons += 1;
            if a == b {
                matches += 1.0;
                continue;
            }
            let b_syn = synonyms_of(b);
            let related = a_syn.contains(b)
                || b_syn.contains(&a.as_str())
                || a_syn.iter().any(|s| b_syn.contains(s));
            if related {
                matches += 0.7;
            }
        }
    }

    matches / comparisons.max(1) as f64
}
