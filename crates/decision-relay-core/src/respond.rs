//! Reply synthesis for injected context.
//!
//! [`ContextDigest`] condenses the buffered messages that matched a new
//! message. A [`ResponseSynthesizer`] turns the digest into the reply shown
//! to the user. [`TemplateResponder`] never fails and is the fallback for
//! every other synthesizer.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::matcher::ContextMatch;
use crate::models::{excerpt, ExtractedEntities};

/// Matched messages carried in a digest.
const DIGEST_MESSAGES: usize = 3;

/// Matched messages quoted in a template reply.
const TEMPLATE_MESSAGES: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestMessage {
    pub user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// What the new message shares with recent buffered discussion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextDigest {
    pub overlapping_components: BTreeSet<String>,
    pub overlapping_requirements: BTreeSet<String>,
    pub mentioned_users: BTreeSet<String>,
    /// Newest matched messages first.
    pub messages: Vec<DigestMessage>,
    pub total_matches: usize,
}

impl ContextDigest {
    pub fn from_matches(new: &ExtractedEntities, matches: &[ContextMatch]) -> Self {
        let mut digest = ContextDigest {
            total_matches: matches.len(),
            ..Default::default()
        };

        for m in matches {
            let entities = &m.message.entities;
            digest
                .overlapping_components
                .extend(new.components.intersection(&entities.components).cloned());
            digest
                .overlapping_requirements
                .extend(new.requirement_ids.intersection(&entities.requirement_ids).cloned());
            digest
                .mentioned_users
                .extend(entities.mentioned_users.iter().cloned());
            digest.messages.push(DigestMessage {
                user_id: m.message.user_id.clone(),
                text: excerpt(&m.message.text, 200),
                timestamp: m.message.timestamp,
            });
        }

        digest
            .messages
            .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        digest.messages.truncate(DIGEST_MESSAGES);
        digest
    }

    pub fn is_empty(&self) -> bool {
        self.total_matches == 0
    }

    /// One-line summary of the newest matches, `user: text | user: text`.
    pub fn summary_line(&self) -> String {
        self.messages
            .iter()
            .take(TEMPLATE_MESSAGES)
            .map(|m| format!("{}: {}", m.user_id, excerpt(&m.text, 100)))
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Multi-line summary used as language-model prompt context.
    pub fn prompt_summary(&self, now: DateTime<Utc>) -> String {
        let mut lines = Vec::new();
        if !self.overlapping_components.is_empty() {
            lines.push(format!("Components: {}", join(&self.overlapping_components)));
        }
        if !self.overlapping_requirements.is_empty() {
            lines.push(format!("Requirements: {}", join(&self.overlapping_requirements)));
        }
        lines.push("Recent discussions:".to_string());
        for (i, m) in self.messages.iter().enumerate() {
            lines.push(format!(
                "{}. @{} ({}): {}",
                i + 1,
                m.user_id,
                time_ago(now, m.timestamp),
                m.text
            ));
        }
        if !self.mentioned_users.is_empty() {
            lines.push(format!("People involved: {}", join(&self.mentioned_users)));
        }
        lines.join("\n")
    }
}

/// Everything a synthesizer needs to write one reply.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRequest<'a> {
    pub user_id: &'a str,
    pub user_message: &'a str,
    pub digest: &'a ContextDigest,
    pub gap_created: bool,
}

#[async_trait]
pub trait ResponseSynthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn respond(&self, request: &ResponseRequest<'_>) -> Result<String>;
}

/// Fixed-template replies. Never fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateResponder;

impl TemplateResponder {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, request: &ResponseRequest<'_>) -> String {
        let digest = request.digest;
        let components = if digest.overlapping_components.is_empty() {
            "the mentioned topics".to_string()
        } else {
            join(&digest.overlapping_components)
        };
        let summary = digest.summary_line();

        if request.gap_created {
            format!(
                "I've flagged this as a potential knowledge gap since you weren't included in the original {} discussion. Here's the context: {}",
                components, summary
            )
        } else if !digest.overlapping_requirements.is_empty() || digest.overlapping_components.len() >= 2 {
            format!(
                "Based on recent team discussion about {}, here's what you should know: {}",
                components, summary
            )
        } else {
            let users = if digest.mentioned_users.is_empty() {
                "the team".to_string()
            } else {
                join(&digest.mentioned_users)
            };
            format!(
                "I found some related discussion about {}. You might want to check with {} for details.",
                components, users
            )
        }
    }
}

#[async_trait]
impl ResponseSynthesizer for TemplateResponder {
    fn name(&self) -> &str {
        "template"
    }

    async fn respond(&self, request: &ResponseRequest<'_>) -> Result<String> {
        Ok(self.render(request))
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn time_ago(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        s if s < 60 => "just now".to_string(),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Overlap, Tier};
    use crate::models::{ContextMessage, ExtractionSource};
    use chrono::Duration;

    fn entities(reqs: &[&str], components: &[&str], mentions: &[&str]) -> ExtractedEntities {
        let mut e = ExtractedEntities::empty(ExtractionSource::Pattern);
        e.requirement_ids = reqs.iter().map(|s| s.to_string()).collect();
        e.components = components.iter().map(|s| s.to_string()).collect();
        e.mentioned_users = mentions.iter().map(|s| s.to_string()).collect();
        e
    }

    fn matched(user: &str, text: &str, e: ExtractedEntities, ts: DateTime<Utc>) -> ContextMatch {
        ContextMatch {
            message: ContextMessage {
                message_id: format!("{}-{}", user, ts.timestamp_millis()),
                user_id: user.into(),
                channel_id: "hw".into(),
                thread_id: "t".into(),
                text: text.into(),
                entities: e,
                decision_id: None,
                timestamp: ts,
            },
            overlap: Overlap {
                tier: Tier::High,
                score: 2.0,
            },
        }
    }

    #[test]
    fn test_digest_overlap_and_order() {
        let now = Utc::now();
        let new = entities(&["REQ-245"], &["motor"], &[]);
        let matches = vec![
            matched("alice", "REQ-245 torque up", entities(&["REQ-245"], &["motor"], &["bob"]), now - Duration::minutes(10)),
            matched("carol", "motor mount", entities(&[], &["motor", "mechanical"], &[]), now - Duration::minutes(2)),
        ];
        let digest = ContextDigest::from_matches(&new, &matches);
        assert_eq!(digest.total_matches, 2);
        assert_eq!(digest.messages[0].user_id, "carol");
        assert!(digest.overlapping_requirements.contains("REQ-245"));
        assert_eq!(join(&digest.overlapping_components), "motor");
        assert!(digest.mentioned_users.contains("bob"));
        assert!(digest.prompt_summary(now).contains("@carol (2m ago): motor mount"));
    }

    #[test]
    fn test_template_choice() {
        let now = Utc::now();
        let new = entities(&["REQ-245"], &["motor"], &[]);
        let matches = vec![matched(
            "alice",
            "REQ-245 torque up",
            entities(&["REQ-245"], &["motor"], &[]),
            now,
        )];
        let digest = ContextDigest::from_matches(&new, &matches);
        let mut req = ResponseRequest {
            user_id: "bob",
            user_message: "what changed on REQ-245?",
            digest: &digest,
            gap_created: false,
        };
        let high = TemplateResponder.render(&req);
        assert!(high.starts_with("Based on recent team discussion about motor"));
        assert!(high.contains("alice: REQ-245 torque up"));

        req.gap_created = true;
        assert!(TemplateResponder
            .render(&req)
            .starts_with("I've flagged this as a potential knowledge gap"));

        let medium_digest = ContextDigest::from_matches(
            &entities(&[], &["motor"], &[]),
            &[matched("alice", "motor", entities(&[], &["motor"], &[]), now)],
        );
        let medium = TemplateResponder.render(&ResponseRequest {
            user_id: "bob",
            user_message: "motor?",
            digest: &medium_digest,
            gap_created: false,
        });
        assert_eq!(
            medium,
            "I found some related discussion about motor. You might want to check with the team for details."
        );
    }
}
