//! Completion proxy
//!
//! Validates an inbound conversation, gates it on moderation, fits it into
//! the model's context window and submits it upstream as a streaming
//! completion. The upstream body is handed back unread for relaying.

use std::sync::Arc;
use std::time::Instant;

use chatgate_context::{last_user_message, ContextTrimmer, Message, Role, TokenBudget};
use chatgate_runtime::{
    CompletionRequest, CompletionService, CompletionStream, ModerationService, ProviderError,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::GatewayError;
use crate::metrics::{TRIMMED_MESSAGES, UPSTREAM_ERRORS, UPSTREAM_LATENCY};
use crate::safety::SafetyGate;

/// Fixed parameters of every proxied completion
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub model: String,
    /// Tokens kept free for the reply, also the upstream `max_tokens`
    pub reserved_completion_tokens: u32,
    /// Prepended ahead of the conversation and never trimmed
    pub init_messages: Vec<Message>,
}

/// Inbound request body
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Option<Vec<RawMessage>>,
}

/// Message as sent by the client, before role validation
#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub role: String,
    pub content: String,
}

/// Parses and validates a raw request body into a conversation.
///
/// Rejects empty bodies, malformed JSON, missing or empty message lists,
/// roles other than `user`/`assistant`, and conversations without a user turn.
pub fn parse_conversation(body: &[u8]) -> Result<Vec<Message>, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GatewayError::user("Missing request data"));
    }

    let request: ChatRequest = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Request body is not a valid chat request");
        GatewayError::user("Invalid request data")
    })?;

    let raw = match request.messages {
        Some(messages) if !messages.is_empty() => messages,
        _ => return Err(GatewayError::user("Missing messages in request data")),
    };

    let messages = raw
        .into_iter()
        .map(|m| {
            m.role
                .parse::<Role>()
                .map(|role| Message::new(role, &m.content))
                .map_err(|e| GatewayError::user(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let active = last_user_message(&messages)
        .ok_or_else(|| GatewayError::user("Missing user message in request data"))?;
    debug!(
        messages = messages.len(),
        active_turn_chars = active.content.len(),
        "Parsed conversation"
    );

    Ok(messages)
}

pub struct CompletionProxy {
    completion: Arc<dyn CompletionService>,
    safety: SafetyGate,
    trimmer: ContextTrimmer,
    settings: ProxySettings,
}

impl CompletionProxy {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        moderation: Arc<dyn ModerationService>,
        budget: Arc<dyn TokenBudget>,
        settings: ProxySettings,
    ) -> Self {
        Self {
            completion,
            safety: SafetyGate::new(moderation),
            trimmer: ContextTrimmer::new(budget),
            settings,
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Runs the whole pipeline for one raw request body.
    pub async fn handle(&self, body: &[u8]) -> Result<CompletionStream, GatewayError> {
        let conversation = parse_conversation(body)?;
        self.complete(conversation).await
    }

    /// Runs moderation, trimming and the upstream call for a validated
    /// conversation.
    pub async fn complete(
        &self,
        conversation: Vec<Message>,
    ) -> Result<CompletionStream, GatewayError> {
        let conversation = self.safety.check_all(conversation).await?;

        let messages = self.fit(&conversation)?;

        let request = CompletionRequest::streaming(
            self.settings.model.clone(),
            messages,
            self.settings.reserved_completion_tokens,
        );

        let started = Instant::now();
        let stream = self
            .completion
            .stream_completion(request)
            .await
            .map_err(upstream_error)?;
        UPSTREAM_LATENCY.observe(started.elapsed().as_secs_f64());

        info!(
            model = %self.settings.model,
            provider = self.completion.name(),
            "Relaying completion stream"
        );
        Ok(stream)
    }

    fn fit(&self, conversation: &[Message]) -> Result<Vec<Message>, GatewayError> {
        let trimmed = self
            .trimmer
            .fit(
                &self.settings.init_messages,
                conversation,
                self.settings.reserved_completion_tokens as usize,
                &self.settings.model,
            )
            .map_err(|e| GatewayError::application(e.to_string()))?;
        TRIMMED_MESSAGES.inc_by(trimmed.dropped as f64);

        if !trimmed.within_budget() {
            return Err(GatewayError::application_with_data(
                "Init messages exceed the model context window",
                json!({
                    "token_cost": trimmed.token_cost,
                    "reserved_completion_tokens": trimmed.reserved_completion_tokens,
                    "max_total_tokens": trimmed.max_total_tokens,
                }),
            ));
        }

        if last_user_message(trimmed.context()).is_none() {
            return Err(GatewayError::user(
                "Conversation does not fit the model context window",
            ));
        }

        if trimmed.dropped > 0 {
            info!(
                dropped = trimmed.dropped,
                kept = trimmed.context().len(),
                token_cost = trimmed.token_cost,
                "Trimmed conversation to fit the context window"
            );
        }

        Ok(trimmed.into_messages())
    }
}

fn upstream_error(err: ProviderError) -> GatewayError {
    UPSTREAM_ERRORS
        .with_label_values(&["completion", err.kind()])
        .inc();

    let data = match err {
        ProviderError::HttpStatus { status, body } => json!({ "status": status, "body": body }),
        other => json!({ "error": other.to_string() }),
    };
    GatewayError::application_with_data("Failed to generate completion", data)
}
