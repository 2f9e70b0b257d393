//! Language-model replies for injected context.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use decision_relay_core::clock::Clock;
use decision_relay_core::error::Result;
use decision_relay_core::respond::{ResponseRequest, ResponseSynthesizer, TemplateResponder};

use crate::config::ExtractionConfig;
use crate::llm::{ChatClient, ChatMessage, ChatOptions};

const SYSTEM_PROMPT: &str = "You are an assistant for a hardware engineering team. \
When a team member mentions components or requirements that were recently discussed, \
give them the context they need. Be concise and actionable. Reference requirement IDs \
(REQ-XXX) and the people involved when relevant.";

const RESPONSE_OPTIONS: ChatOptions = ChatOptions {
    max_tokens: 300,
    temperature: 0.3,
    json: false,
};

/// Chat-completions replies. Any failure or timeout returns the template
/// reply instead, so `respond` never errors.
pub struct LlmResponder {
    chat: Arc<ChatClient>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    fallback: TemplateResponder,
}

impl LlmResponder {
    pub fn new(chat: Arc<ChatClient>, timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            chat,
            timeout,
            clock,
            fallback: TemplateResponder::new(),
        }
    }

    fn user_prompt(&self, request: &ResponseRequest<'_>) -> String {
        let gap_note = if request.gap_created {
            "\nNOTE: this user was not part of the original discussion; a knowledge gap alert was created.\n"
        } else {
            ""
        };
        format!(
            "A team member (@{}) just said: \"{}\"\n\nRelated recent discussion:\n{}\n{}\nReply in 2-3 sentences: summarize the relevant context, highlight key decisions, and suggest who to talk to.",
            request.user_id,
            request.user_message,
            request.digest.prompt_summary(self.clock.now()),
            gap_note
        )
    }
}

#[async_trait]
impl ResponseSynthesizer for LlmResponder {
    fn name(&self) -> &str {
        "llm"
    }

    async fn respond(&self, request: &ResponseRequest<'_>) -> Result<String> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(self.user_prompt(request)),
        ];

        match tokio::time::timeout(self.timeout, self.chat.complete(&messages, RESPONSE_OPTIONS)).await {
            Ok(Ok(text)) if !text.is_empty() => Ok(text),
            Ok(Ok(_)) => {
                tracing::warn!("empty LLM reply, using template");
                Ok(self.fallback.render(request))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "LLM reply failed, using template");
                Ok(self.fallback.render(request))
            }
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "LLM reply timed out, using template");
                Ok(self.fallback.render(request))
            }
        }
    }
}

/// Pick the responder for `config`: the LLM when enabled and reachable,
/// otherwise templates.
pub fn build_responder(config: &ExtractionConfig, clock: Arc<dyn Clock>) -> Arc<dyn ResponseSynthesizer> {
    if !(config.is_enabled() && config.llm_responses) {
        return Arc::new(TemplateResponder::new());
    }
    match ChatClient::from_config(config) {
        Ok(chat) => Arc::new(LlmResponder::new(
            Arc::new(chat),
            Duration::from_millis(config.response_timeout_ms),
            clock,
        )),
        Err(e) => {
            tracing::warn!(error = %e, "LLM replies unavailable, using templates");
            Arc::new(TemplateResponder::new())
        }
    }
}
