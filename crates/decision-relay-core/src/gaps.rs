//! Gap detection over decision history.
//!
//! Three families of coordination failure:
//!
//! - **Missing stakeholder**: owners of a decision's components who were
//!   neither its author nor part of its thread. One gap per missing person.
//! - **Conflict**: within decisions sharing a component or requirement,
//!   approval-vs-rejection co-occurrence, antonym pairs between consecutive
//!   decisions, circular value changes, and repeated identical decisions.
//! - **Broken dependency**: a change to a component that others depend on,
//!   where a dependent component's owner was not in the thread.
//!
//! Everything except [`GapDetector::detect`] and [`persist_gaps`] is a pure
//! function of its inputs. Output is sorted critical first, then by newest
//! related decision, then by fingerprint, so identical history always
//! yields content-identical gaps.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::directory::{OwnershipDirectory, UserProfile};
use crate::error::{CoreError, Result};
use crate::matcher::ContextMatch;
use crate::models::{Decision, DecisionType, Gap, GapType, Severity};
use crate::store::{window_start, DecisionQuery, DecisionStore};

/// Characters of decision text quoted in gap descriptions.
const EXCERPT_CHARS: usize = 100;

/// Missing stakeholders above this count make a gap critical.
const CRITICAL_MISSING_COUNT: usize = 2;

static ANTONYM_PAIRS: Lazy<Vec<(Regex, Regex)>> = Lazy::new(|| {
    [
        ("increas", "decreas"),
        ("add", "remov"),
        ("enabl", "disabl"),
        ("approv", "reject"),
        ("accept", "declin"),
    ]
    .into_iter()
    .map(|(a, b)| (word_stem(a), word_stem(b)))
    .collect()
});

static CHANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([\w.]+)(?:\s+to\s+|\s*→\s*|\s*->\s*)([\w.]+)").unwrap()
});

fn word_stem(stem: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}(?:e|es|ed|ing|s)?\b", stem)).unwrap()
}

/// Fixed component dependency graph: `dependent -> dependencies`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new<I, K, V, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            edges: edges
                .into_iter()
                .map(|(k, v)| (k.into(), v.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    /// Components that depend on `component`, sorted.
    pub fn dependents_of(&self, component: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(component))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    pub fn dependencies_of(&self, component: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(component)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new([
            ("motor", vec!["mechanical", "power_supply"]),
            ("pcb", vec!["power_supply", "firmware", "protocol"]),
            ("power_supply", vec!["thermal"]),
            ("firmware", vec!["security"]),
            ("mechanical", vec!["thermal"]),
            ("testing", vec!["firmware", "pcb"]),
        ])
    }
}

/// Gaps grouped by family.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GapReport {
    pub missing_stakeholders: Vec<Gap>,
    pub conflicts: Vec<Gap>,
    pub broken_dependencies: Vec<Gap>,
}

impl GapReport {
    pub fn len(&self) -> usize {
        self.missing_stakeholders.len() + self.conflicts.len() + self.broken_dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gap> {
        self.missing_stakeholders
            .iter()
            .chain(self.conflicts.iter())
            .chain(self.broken_dependencies.iter())
    }

    /// Fingerprints of every gap, for content comparison across runs.
    pub fn fingerprints(&self) -> BTreeSet<&str> {
        self.iter().map(|g| g.fingerprint.as_str()).collect()
    }
}

/// Result of [`persist_gaps`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistSummary {
    pub created: usize,
    pub existing: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum ConflictKind {
    ApprovalRejection,
    Antonym,
    Circular,
    Duplicate,
}

struct Missing {
    profile: UserProfile,
    reason: String,
}

pub struct GapDetector {
    directory: Arc<dyn OwnershipDirectory>,
    graph: DependencyGraph,
}

impl GapDetector {
    pub fn new(directory: Arc<dyn OwnershipDirectory>, graph: DependencyGraph) -> Self {
        Self { directory, graph }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Load the last `window_days` of decisions and their thread
    /// participants from `store`, then analyze them.
    pub async fn detect(
        &self,
        store: &dyn DecisionStore,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<GapReport> {
        let decisions = store
            .query_decisions(&DecisionQuery::new().since(window_start(now, window_days)?))
            .await?;

        let mut participants: HashMap<String, BTreeSet<String>> = HashMap::new();
        for d in &decisions {
            if !participants.contains_key(&d.thread_id) {
                let p = store.thread_participants(&d.thread_id).await?;
                participants.insert(d.thread_id.clone(), p);
            }
        }

        let report = self.analyze(&decisions, &participants, now);
        tracing::info!(
            decisions = decisions.len(),
            missing_stakeholders = report.missing_stakeholders.len(),
            conflicts = report.conflicts.len(),
            broken_dependencies = report.broken_dependencies.len(),
            "gap detection complete"
        );
        Ok(report)
    }

    /// Run all three families over `decisions`. `participants` maps thread
    /// ID to the users who posted in or were mentioned in that thread.
    pub fn analyze(
        &self,
        decisions: &[Decision],
        participants: &HashMap<String, BTreeSet<String>>,
        now: DateTime<Utc>,
    ) -> GapReport {
        let empty = BTreeSet::new();

        let mut missing_stakeholders: Vec<Gap> = decisions
            .iter()
            .flat_map(|d| {
                let thread = participants.get(&d.thread_id).unwrap_or(&empty);
                self.stakeholder_gaps(d, &[], thread, now)
            })
            .collect();

        let mut conflicts = self.conflicts(decisions, now);

        let mut broken_dependencies: Vec<Gap> = decisions
            .iter()
            .flat_map(|d| {
                let thread = participants.get(&d.thread_id).unwrap_or(&empty);
                self.dependency_gaps(d, thread, now)
            })
            .collect();

        sort_gaps(&mut missing_stakeholders, decisions);
        sort_gaps(&mut conflicts, decisions);
        sort_gaps(&mut broken_dependencies, decisions);

        GapReport {
            missing_stakeholders,
            conflicts,
            broken_dependencies,
        }
    }

    /// Missing-stakeholder analysis for a freshly created decision that
    /// matched buffered context. Authors of matched buffered decisions count
    /// as stakeholders alongside component owners. The decision's own author
    /// is never an assignee.
    pub fn maybe_create_gap(
        &self,
        decision: &Decision,
        matched: &[ContextMatch],
        participants: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Gap> {
        let extra: Vec<String> = matched
            .iter()
            .filter(|m| m.message.decision_id.is_some())
            .map(|m| m.message.user_id.clone())
            .collect();
        let mut gaps = self.stakeholder_gaps(decision, &extra, participants, now);
        sort_gaps(&mut gaps, std::slice::from_ref(decision));
        gaps
    }

    fn stakeholder_gaps(
        &self,
        decision: &Decision,
        extra_stakeholders: &[String],
        participants: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Gap> {
        let excluded = |user_id: &str| user_id == decision.author_id || participants.contains(user_id);

        let mut missing: BTreeMap<String, Missing> = BTreeMap::new();
        for component in &decision.affected_components {
            for owner in self.directory.owners_of(component) {
                if excluded(owner.user_id.as_str()) || missing.contains_key(&owner.user_id) {
                    continue;
                }
                missing.insert(
                    owner.user_id.clone(),
                    Missing {
                        profile: owner,
                        reason: format!("owns {}", component),
                    },
                );
            }
        }
        for user_id in extra_stakeholders {
            if excluded(user_id.as_str()) || missing.contains_key(user_id) {
                continue;
            }
            let profile = self.directory.profile(user_id).unwrap_or_else(|| UserProfile {
                user_id: user_id.clone(),
                name: String::new(),
                role: String::new(),
                owned_components: BTreeSet::new(),
            });
            missing.insert(
                user_id.clone(),
                Missing {
                    profile,
                    reason: "made a related recent decision".to_string(),
                },
            );
        }

        if missing.is_empty() {
            return Vec::new();
        }

        let severity = if missing.len() > CRITICAL_MISSING_COUNT
            || missing.values().any(|m| m.profile.is_lead())
        {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let recommendation = stakeholder_recommendation(&missing, decision);
        let excerpt = decision.excerpt(EXCERPT_CHARS);

        missing
            .values()
            .map(|m| {
                Gap::new(
                    GapType::MissingStakeholder,
                    severity,
                    format!(
                        "{}, who {}, was not part of the discussion for \"{}\"",
                        describe(&m.profile),
                        m.reason,
                        excerpt
                    ),
                    m.profile.user_id.clone(),
                    Some(decision.decision_id.clone()),
                    recommendation.clone(),
                    now,
                )
            })
            .collect()
    }

    fn conflicts(&self, decisions: &[Decision], now: DateTime<Utc>) -> Vec<Gap> {
        let mut by_component: BTreeMap<&str, Vec<&Decision>> = BTreeMap::new();
        let mut by_requirement: BTreeMap<&str, Vec<&Decision>> = BTreeMap::new();
        for d in decisions {
            for c in &d.affected_components {
                by_component.entry(c.as_str()).or_default().push(d);
            }
            for r in &d.referenced_requirements {
                by_requirement.entry(r.as_str()).or_default().push(d);
            }
        }

        let mut seen: HashSet<(ConflictKind, Vec<String>)> = HashSet::new();
        let mut gaps = Vec::new();
        for (label, group) in by_component.into_iter().chain(by_requirement) {
            if group.len() < 2 {
                continue;
            }
            let mut group = group;
            group.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.decision_id.cmp(&b.decision_id))
            });
            for (kind, involved, severity, description, recommendation) in group_conflicts(label, &group) {
                let mut ids: Vec<String> = involved.iter().map(|d| d.decision_id.clone()).collect();
                ids.sort();
                ids.dedup();
                if !seen.insert((kind, ids)) {
                    continue;
                }
                let newest = involved
                    .iter()
                    .max_by(|a, b| {
                        a.timestamp
                            .cmp(&b.timestamp)
                            .then_with(|| b.decision_id.cmp(&a.decision_id))
                    })
                    .copied();
                let Some(newest) = newest else { continue };
                gaps.push(Gap::new(
                    GapType::Conflict,
                    severity,
                    description,
                    newest.author_id.clone(),
                    Some(newest.decision_id.clone()),
                    recommendation,
                    now,
                ));
            }
        }
        gaps
    }

    fn dependency_gaps(
        &self,
        decision: &Decision,
        participants: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Vec<Gap> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut gaps = Vec::new();
        let excerpt = decision.excerpt(EXCERPT_CHARS);

        for component in &decision.affected_components {
            let dependents = self.graph.dependents_of(component);
            if dependents.is_empty() {
                continue;
            }
            let recommendation = format!(
                "Inform owners of {} about changes to {}",
                dependents.join(", "),
                component
            );
            for dependent in &dependents {
                for owner in self.directory.owners_of(dependent) {
                    if owner.user_id == decision.author_id
                        || participants.contains(&owner.user_id)
                        || !seen.insert(owner.user_id.clone())
                    {
                        continue;
                    }
                    gaps.push(Gap::new(
                        GapType::BrokenDependency,
                        Severity::Warning,
                        format!(
                            "Change to {} may affect {}, owned by {}, who was not in the thread for \"{}\"",
                            component,
                            dependent,
                            describe(&owner),
                            excerpt
                        ),
                        owner.user_id.clone(),
                        Some(decision.decision_id.clone()),
                        recommendation.clone(),
                        now,
                    ));
                }
            }
        }
        gaps
    }
}

type Finding<'a> = (ConflictKind, Vec<&'a Decision>, Severity, String, String);

/// Conflicts inside one chronologically sorted group.
fn group_conflicts<'a>(label: &str, group: &[&'a Decision]) -> Vec<Finding<'a>> {
    let mut findings = Vec::new();

    // Approval co-occurring with a rejection.
    let approvals: Vec<&Decision> = group
        .iter()
        .copied()
        .filter(|d| d.decision_type == DecisionType::Approval)
        .collect();
    let rejections: Vec<&Decision> = group
        .iter()
        .copied()
        .filter(|d| d.text.to_lowercase().contains("reject"))
        .collect();
    let distinct = approvals
        .iter()
        .any(|a| rejections.iter().any(|r| r.decision_id != a.decision_id));
    if distinct {
        let mut involved: Vec<&Decision> = approvals.iter().chain(rejections.iter()).copied().collect();
        involved.sort_by(|a, b| a.decision_id.cmp(&b.decision_id));
        involved.dedup_by(|a, b| a.decision_id == b.decision_id);
        findings.push((
            ConflictKind::ApprovalRejection,
            involved,
            Severity::Critical,
            format!("Conflicting approval and rejection decisions for {}", label),
            format!("Clarify current status of {}: approved or rejected?", label),
        ));
    }

    // Antonyms: every pair less than a day apart, plus consecutive pairs
    // at any distance.
    for (i, prev) in group.iter().copied().enumerate() {
        for (offset, cur) in group[i + 1..].iter().copied().enumerate() {
            let close = cur.timestamp - prev.timestamp < Duration::hours(24);
            if !close && offset > 0 {
                continue;
            }
            let contradicts = ANTONYM_PAIRS.iter().any(|(pos, neg)| {
                (pos.is_match(&cur.text) && neg.is_match(&prev.text))
                    || (neg.is_match(&cur.text) && pos.is_match(&prev.text))
            });
            if !contradicts {
                continue;
            }
            findings.push((
                ConflictKind::Antonym,
                vec![prev, cur],
                if close { Severity::Critical } else { Severity::Warning },
                format!(
                    "Contradictory decisions for {}: \"{}\" then \"{}\"",
                    label,
                    prev.excerpt(EXCERPT_CHARS),
                    cur.excerpt(EXCERPT_CHARS)
                ),
                format!(
                    "Resolve contradictory {} decisions between {} and {}",
                    label, prev.author_id, cur.author_id
                ),
            ));
        }
    }

    // Circular value changes: A -> B in one decision, B -> A in another.
    let changes: Vec<(&Decision, String, String)> = group
        .iter()
        .copied()
        .flat_map(|d| {
            CHANGE_RE.captures_iter(&d.text).map(move |c| {
                let clean = |i: usize| {
                    c.get(i)
                        .map(|m| m.as_str().trim_end_matches('.').to_lowercase())
                        .unwrap_or_default()
                };
                (d, clean(1), clean(2))
            })
        })
        .filter(|(_, before, after)| !before.is_empty() && !after.is_empty() && before != after)
        .collect();
    for (i, (d1, before1, after1)) in changes.iter().enumerate() {
        for (d2, before2, after2) in &changes[i + 1..] {
            if d1.decision_id != d2.decision_id && before1 == after2 && after1 == before2 {
                findings.push((
                    ConflictKind::Circular,
                    vec![*d1, *d2],
                    Severity::Critical,
                    format!(
                        "Circular change for {}: {} -> {} -> {}",
                        label, before1, after1, before1
                    ),
                    "Clarify the final value and the reasoning for the change".to_string(),
                ));
            }
        }
    }

    // The same decision restated within a day of the latest one.
    if let Some(latest) = group.last() {
        let recent_cutoff = latest.timestamp - Duration::hours(24);
        let mut by_text: BTreeMap<String, Vec<&Decision>> = BTreeMap::new();
        for d in group.iter().copied().filter(|d| d.timestamp > recent_cutoff) {
            by_text.entry(d.text.trim().to_lowercase()).or_default().push(d);
        }
        for repeated in by_text.into_values().filter(|v| v.len() > 1) {
            findings.push((
                ConflictKind::Duplicate,
                repeated,
                Severity::Warning,
                format!(
                    "Multiple recent identical decisions for {} may indicate confusion",
                    label
                ),
                format!(
                    "Verify that the latest {} decision is understood by all stakeholders",
                    label
                ),
            ));
        }
    }

    findings
}

/// Sort critical first, then newest related decision, then fingerprint.
fn sort_gaps(gaps: &mut [Gap], decisions: &[Decision]) {
    let timestamps: HashMap<&str, DateTime<Utc>> = decisions
        .iter()
        .map(|d| (d.decision_id.as_str(), d.timestamp))
        .collect();
    gaps.sort_by(|a, b| {
        let ts = |g: &Gap| {
            g.related_decision_id
                .as_deref()
                .and_then(|id| timestamps.get(id).copied())
        };
        (a.severity, Reverse(ts(a)), &a.fingerprint).cmp(&(b.severity, Reverse(ts(b)), &b.fingerprint))
    });
}

fn describe(profile: &UserProfile) -> String {
    if profile.role.is_empty() {
        profile.display_name().to_string()
    } else {
        format!("{} ({})", profile.display_name(), profile.role)
    }
}

fn stakeholder_recommendation(missing: &BTreeMap<String, Missing>, decision: &Decision) -> String {
    let components: Vec<&str> = decision.affected_components.iter().map(String::as_str).collect();
    let components = if components.is_empty() {
        "these".to_string()
    } else {
        components.join(", ")
    };

    if missing.len() == 1 {
        if let Some(m) = missing.values().next() {
            return format!("Contact {} about the {} impact", describe(&m.profile), components);
        }
    }

    let roles: BTreeSet<&str> = missing
        .values()
        .map(|m| m.profile.role.as_str())
        .filter(|r| !r.is_empty())
        .collect();
    let who = if roles.is_empty() {
        missing
            .values()
            .map(|m| m.profile.display_name())
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        format!("the {} teams", roles.into_iter().collect::<Vec<_>>().join(", "))
    };
    format!("Schedule a review with {} to discuss the {} changes", who, components)
}

/// Store every gap in `report`, skipping ones already present by
/// fingerprint and ones whose decision reference no longer resolves.
pub async fn persist_gaps(store: &dyn DecisionStore, report: &GapReport) -> Result<PersistSummary> {
    persist_all(store, report.iter()).await
}

/// Store `gaps` idempotently. See [`persist_gaps`].
pub async fn persist_all<'a>(
    store: &dyn DecisionStore,
    gaps: impl Iterator<Item = &'a Gap>,
) -> Result<PersistSummary> {
    let mut summary = PersistSummary::default();
    for gap in gaps {
        match store.create_gap(gap).await {
            Ok(insert) if insert.created => summary.created += 1,
            Ok(_) => summary.existing += 1,
            Err(CoreError::Inconsistency(msg)) => {
                tracing::warn!(gap = %gap.fingerprint, error = %msg, "skipping inconsistent gap");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::models::{ContextMessage, ExtractedEntities, ExtractionSource};
    use crate::matcher::{Overlap, Tier};
    use crate::store::InMemoryDecisionStore;

    fn user(id: &str, name: &str, role: &str, owns: &[&str]) -> UserProfile {
        UserProfile {
            user_id: id.into(),
            name: name.into(),
            role: role.into(),
            owned_components: owns.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn detector() -> GapDetector {
        let dir = StaticDirectory::new([
            user("alice", "Alice", "Mechanical Engineer", &["motor"]),
            user("bob", "Bob", "Electrical Lead", &["power_supply"]),
            user("carol", "Carol", "Firmware Engineer", &["firmware"]),
            user("dave", "Dave", "PCB Designer", &["pcb"]),
        ]);
        GapDetector::new(Arc::new(dir), DependencyGraph::default())
    }

    fn decision(
        author: &str,
        thread: &str,
        text: &str,
        components: &[&str],
        reqs: &[&str],
        decision_type: DecisionType,
        ts: DateTime<Utc>,
    ) -> Decision {
        let mut e = ExtractedEntities::empty(ExtractionSource::Pattern);
        e.components = components.iter().map(|s| s.to_string()).collect();
        e.requirement_ids = reqs.iter().map(|s| s.to_string()).collect();
        Decision::new(thread, ts, author, decision_type, text, &e)
    }

    fn participants(pairs: &[(&str, &[&str])]) -> HashMap<String, BTreeSet<String>> {
        pairs
            .iter()
            .map(|(t, users)| (t.to_string(), users.iter().map(|u| u.to_string()).collect()))
            .collect()
    }

    #[test]
    fn test_missing_stakeholder_per_person() {
        let now = Utc::now();
        let d = decision(
            "carol",
            "t1",
            "Updated motor and pcb interface",
            &["motor", "pcb", "firmware"],
            &[],
            DecisionType::TechnicalDecision,
            now,
        );
        let report = detector().analyze(&[d.clone()], &participants(&[("t1", &["carol", "dave"])]), now);
        let assignees: Vec<&str> = report
            .missing_stakeholders
            .iter()
            .map(|g| g.assignee_id.as_str())
            .collect();
        assert_eq!(assignees, vec!["alice"]);
        let gap = &report.missing_stakeholders[0];
        assert_eq!(gap.severity, Severity::Warning);
        assert_eq!(gap.related_decision_id.as_deref(), Some(d.decision_id.as_str()));
        assert!(gap.description.contains("Alice (Mechanical Engineer)"));
    }

    #[test]
    fn test_lead_or_many_missing_is_critical() {
        let now = Utc::now();
        let d = decision(
            "carol",
            "t1",
            "Changed rail",
            &["power_supply"],
            &[],
            DecisionType::TechnicalDecision,
            now,
        );
        let report = detector().analyze(&[d], &HashMap::new(), now);
        assert_eq!(report.missing_stakeholders.len(), 1);
        assert_eq!(report.missing_stakeholders[0].severity, Severity::Critical);

        let d = decision(
            "erin",
            "t2",
            "Changed everything",
            &["motor", "pcb", "firmware"],
            &[],
            DecisionType::TechnicalDecision,
            now,
        );
        let report = detector().analyze(&[d], &HashMap::new(), now);
        assert_eq!(report.missing_stakeholders.len(), 3);
        assert!(report
            .missing_stakeholders
            .iter()
            .all(|g| g.severity == Severity::Critical));
    }

    #[test]
    fn test_antonym_conflict_severity_by_gap() {
        let now = Utc::now();
        let close = [
            decision("alice", "t1", "Increase torque for REQ-7", &[], &["REQ-7"], DecisionType::RequirementChange, now - Duration::hours(5)),
            decision("bob", "t2", "Decrease torque for REQ-7", &[], &["REQ-7"], DecisionType::RequirementChange, now),
        ];
        let report = detector().analyze(&close, &HashMap::new(), now);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, Severity::Critical);
        assert_eq!(report.conflicts[0].assignee_id, "bob");

        let far = [
            decision("alice", "t1", "Enable the watchdog for REQ-8", &[], &["REQ-8"], DecisionType::RequirementChange, now - Duration::days(3)),
            decision("bob", "t2", "Disabled watchdog per REQ-8", &[], &["REQ-8"], DecisionType::RequirementChange, now),
        ];
        let report = detector().analyze(&far, &HashMap::new(), now);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, Severity::Warning);
    }

    #[test]
    fn test_antonym_conflict_across_neutral_decision() {
        let now = Utc::now();
        let group = [
            decision("alice", "t1", "Increase torque for REQ-7", &[], &["REQ-7"], DecisionType::RequirementChange, now - Duration::hours(5)),
            decision("carol", "t2", "Reviewed torque margin for REQ-7", &[], &["REQ-7"], DecisionType::RequirementChange, now - Duration::hours(3)),
            decision("bob", "t3", "Decrease torque for REQ-7", &[], &["REQ-7"], DecisionType::RequirementChange, now),
        ];
        let report = detector().analyze(&group, &HashMap::new(), now);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].severity, Severity::Critical);
        assert_eq!(report.conflicts[0].assignee_id, "bob");
        assert!(report.conflicts[0].description.contains("Increase torque"));
    }

    #[test]
    fn test_antonyms_need_whole_words() {
        let now = Utc::now();
        let group = [
            decision("alice", "t1", "Address the REQ-9 layout", &[], &["REQ-9"], DecisionType::RequirementChange, now - Duration::hours(1)),
            decision("bob", "t2", "Removed REQ-9 test pad", &[], &["REQ-9"], DecisionType::RequirementChange, now),
        ];
        let report = detector().analyze(&group, &HashMap::new(), now);
        assert!(report.conflicts.is_empty());
    }

    #[test]
    fn test_circular_change_is_critical() {
        let now = Utc::now();
        let group = [
            decision("alice", "t1", "REQ-245 torque changed from 2.0Nm to 2.5Nm", &["motor"], &["REQ-245"], DecisionType::RequirementChange, now - Duration::days(5)),
            decision("bob", "t2", "REQ-245 torque reverted 2.5Nm → 2.0Nm.", &["motor"], &["REQ-245"], DecisionType::RequirementChange, now),
        ];
        let report = detector().analyze(&group, &HashMap::new(), now);
        let circular: Vec<&Gap> = report
            .conflicts
            .iter()
            .filter(|g| g.description.starts_with("Circular"))
            .collect();
        // Found in both the motor and REQ-245 groups, reported once.
        assert_eq!(circular.len(), 1);
        assert_eq!(circular[0].severity, Severity::Critical);
        assert!(circular[0].description.contains("2.0nm -> 2.5nm -> 2.0nm"));
    }

    #[test]
    fn test_approval_rejection() {
        let now = Utc::now();
        let group = [
            decision("alice", "t1", "Approved the motor vendor", &["motor"], &[], DecisionType::Approval, now - Duration::hours(3)),
            decision("bob", "t2", "We reject the motor vendor quote", &["motor"], &[], DecisionType::TechnicalDecision, now),
        ];
        let report = detector().analyze(&group, &HashMap::new(), now);
        let kinds: Vec<&str> = report.conflicts.iter().map(|g| g.description.as_str()).collect();
        assert!(kinds
            .iter()
            .any(|d| d.starts_with("Conflicting approval and rejection decisions for motor")));
        assert!(report.conflicts.iter().all(|g| g.severity == Severity::Critical));
    }

    #[test]
    fn test_broken_dependency() {
        let now = Utc::now();
        // Power supply change: motor (alice) and pcb (dave) depend on it.
        let d = decision(
            "bob",
            "t1",
            "Switched power supply to 24V",
            &["power_supply"],
            &[],
            DecisionType::TechnicalDecision,
            now,
        );
        let report = detector().analyze(&[d], &participants(&[("t1", &["bob", "dave"])]), now);
        let assignees: Vec<&str> = report
            .broken_dependencies
            .iter()
            .map(|g| g.assignee_id.as_str())
            .collect();
        assert_eq!(assignees, vec!["alice"]);
        assert_eq!(report.broken_dependencies[0].severity, Severity::Warning);
        assert!(report.broken_dependencies[0]
            .recommendation
            .contains("motor, pcb"));
    }

    #[test]
    fn test_detection_is_idempotent_by_content() {
        let now = Utc::now();
        let decisions = [
            decision("alice", "t1", "Increase motor torque per REQ-1", &["motor", "power_supply"], &["REQ-1"], DecisionType::RequirementChange, now - Duration::hours(2)),
            decision("bob", "t2", "Decrease motor torque per REQ-1", &["motor"], &["REQ-1"], DecisionType::RequirementChange, now),
        ];
        let p = participants(&[("t1", &["alice"])]);
        let det = detector();
        let first = det.analyze(&decisions, &p, now);
        let second = det.analyze(&decisions, &p, now + Duration::minutes(1));
        assert!(!first.is_empty());
        assert_eq!(first.fingerprints(), second.fingerprints());
        let a: Vec<&str> = first.iter().map(|g| g.description.as_str()).collect();
        let b: Vec<&str> = second.iter().map(|g| g.description.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sorted_critical_first() {
        let now = Utc::now();
        let decisions = [
            decision("carol", "t1", "Updated motor mount", &["motor"], &[], DecisionType::TechnicalDecision, now - Duration::hours(1)),
            decision("carol", "t2", "Updated rail", &["power_supply"], &[], DecisionType::TechnicalDecision, now - Duration::hours(2)),
        ];
        let report = detector().analyze(&decisions, &HashMap::new(), now);
        let severities: Vec<Severity> = report.missing_stakeholders.iter().map(|g| g.severity).collect();
        assert_eq!(severities, vec![Severity::Critical, Severity::Warning]);
    }

    #[test]
    fn test_maybe_create_gap_adds_matched_authors() {
        let now = Utc::now();
        let prior = decision("alice", "m1", "REQ-245 motor torque changed", &["motor"], &["REQ-245"], DecisionType::RequirementChange, now - Duration::minutes(5));
        let buffered = ContextMessage {
            message_id: "m1".into(),
            user_id: "zed".into(),
            channel_id: "hw".into(),
            thread_id: "m1".into(),
            text: prior.text.clone(),
            entities: ExtractedEntities::empty(ExtractionSource::Pattern),
            decision_id: Some(prior.decision_id.clone()),
            timestamp: prior.timestamp,
        };
        let matched = vec![ContextMatch {
            message: buffered,
            overlap: Overlap { tier: Tier::High, score: 1.5 },
        }];
        let new = decision("carol", "m2", "Decided motor firmware update", &["firmware"], &[], DecisionType::TechnicalDecision, now);
        let thread: BTreeSet<String> = ["carol".to_string()].into_iter().collect();

        let gaps = detector().maybe_create_gap(&new, &matched, &thread, now);
        let assignees: Vec<&str> = gaps.iter().map(|g| g.assignee_id.as_str()).collect();
        assert_eq!(assignees, vec!["zed"]);
        assert!(gaps.iter().all(|g| g.assignee_id != "carol"));
    }

    #[tokio::test]
    async fn test_detect_and_persist_idempotent() {
        let store = InMemoryDecisionStore::new();
        let now = Utc::now();
        let d = decision("carol", "t1", "Updated motor mount", &["motor"], &[], DecisionType::TechnicalDecision, now);
        store.create_decision(&d).await.unwrap();
        store.record_participant("t1", "carol").await.unwrap();

        let det = detector();
        let report = det.detect(&store, 30, now).await.unwrap();
        assert_eq!(report.missing_stakeholders.len(), 1);

        let first = persist_gaps(&store, &report).await.unwrap();
        let again = det.detect(&store, 30, now).await.unwrap();
        let second = persist_gaps(&store, &again).await.unwrap();
        assert_eq!(first.created, report.len());
        assert_eq!(second.created, 0);
        assert_eq!(second.existing, report.len());
        assert_eq!(store.list_gaps(None).await.unwrap().len(), report.len());
    }

    #[tokio::test]
    async fn test_detect_rejects_bad_window() {
        let store = InMemoryDecisionStore::new();
        let det = detector();
        assert!(det.detect(&store, 200_000_000, Utc::now()).await.is_err());
        assert!(det.detect(&store, 0, Utc::now()).await.is_err());
    }
}
