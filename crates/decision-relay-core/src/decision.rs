//! Decision-worthiness and decision-type classification.

use crate::models::{DecisionType, ExtractedEntities};

/// Words that mark a component discussion as a decision.
pub const DECISION_KEYWORDS: &[&str] = &[
    "decision",
    "decided",
    "approved",
    "selected",
    "chose",
    "updated",
    "changed",
    "requirement",
    "spec",
];

const TYPE_INDICATORS: &[&str] = &[
    "approved",
    "decided",
    "changing",
    "update",
    "revised",
    "confirmed",
    "selected",
    "rejected",
    "implemented",
    "modified",
    "upgraded",
];

/// Whether a message should be persisted as a decision.
///
/// Checked in order: any requirement ID; two or more components plus a
/// decision keyword; high extraction confidence plus two or more topics.
pub fn is_decision_worthy(text: &str, entities: &ExtractedEntities) -> bool {
    if !entities.requirement_ids.is_empty() {
        return true;
    }

    let lower = text.to_lowercase();
    if entities.components.len() >= 2 && DECISION_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }

    entities.confidence > 0.8 && entities.topics.len() >= 2
}

/// Classify a decision-worthy message by the indicators it contains.
pub fn classify_decision_type(text: &str) -> DecisionType {
    let lower = text.to_lowercase();
    if !TYPE_INDICATORS.iter().any(|i| lower.contains(i)) {
        return DecisionType::Discussion;
    }

    if lower.contains("req-") || lower.contains("requirement") {
        DecisionType::RequirementChange
    } else if ["design", "implement", "build"].iter().any(|w| lower.contains(w)) {
        DecisionType::DesignDecision
    } else if ["approved", "accept", "reject"].iter().any(|w| lower.contains(w)) {
        DecisionType::Approval
    } else {
        DecisionType::TechnicalDecision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PatternExtractor;

    fn worthy(text: &str) -> bool {
        let e = PatternExtractor::new().extract_sync(text);
        is_decision_worthy(text, &e)
    }

    #[test]
    fn test_requirement_is_always_worthy() {
        assert!(worthy("REQ-245 motor torque changed from 2.0Nm to 2.5Nm"));
        assert!(worthy("what about REQ-9?"));
    }

    #[test]
    fn test_components_need_keyword() {
        assert!(worthy("We decided the motor will run off the pcb rail"));
        assert!(!worthy("the motor sits next to the pcb"));
    }

    #[test]
    fn test_confident_topics() {
        let mut e = PatternExtractor::new().extract_sync("nothing here");
        e.topics.insert("thermal_management".into());
        e.topics.insert("pcb_design".into());
        e.confidence = 0.9;
        assert!(is_decision_worthy("nothing here", &e));
        e.confidence = 0.8;
        assert!(!is_decision_worthy("nothing here", &e));
    }

    #[test]
    fn test_classify_decision_type() {
        assert_eq!(
            classify_decision_type("Updated REQ-245 torque to 2.5Nm"),
            DecisionType::RequirementChange
        );
        assert_eq!(
            classify_decision_type("Decided to implement the new bracket design"),
            DecisionType::DesignDecision
        );
        assert_eq!(
            classify_decision_type("Supplier quote approved"),
            DecisionType::Approval
        );
        assert_eq!(
            classify_decision_type("Confirmed the 12V rail"),
            DecisionType::TechnicalDecision
        );
        assert_eq!(
            classify_decision_type("Anyone have the torque numbers?"),
            DecisionType::Discussion
        );
    }
}
