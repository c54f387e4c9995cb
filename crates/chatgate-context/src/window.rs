//! Context window fitting
//!
//! [`ContextTrimmer::fit`] drops the oldest conversational turns until the
//! prompt plus the reserved completion tokens fits strictly below the model's
//! context size. Init messages are never dropped. The full cost is recomputed
//! after every drop because chat framing makes token costs non-additive.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::budget::TokenBudget;
use crate::context::Message;
use crate::error::ContextResult;

/// Outcome of fitting a conversation into a model's context window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrimmedRequest {
    /// Init messages followed by the surviving context, in send order
    pub messages: Vec<Message>,
    /// Number of leading entries in `messages` that are init messages
    pub init_len: usize,
    /// How many context messages were dropped from the front
    pub dropped: usize,
    /// Prompt cost of `messages`
    pub token_cost: usize,
    pub reserved_completion_tokens: usize,
    pub max_total_tokens: usize,
}

impl TrimmedRequest {
    pub fn init(&self) -> &[Message] {
        &self.messages[..self.init_len]
    }

    /// The surviving suffix of the original context.
    pub fn context(&self) -> &[Message] {
        &self.messages[self.init_len..]
    }

    pub fn within_budget(&self) -> bool {
        self.token_cost + self.reserved_completion_tokens < self.max_total_tokens
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Fits conversations into a model's context window
#[derive(Clone)]
pub struct ContextTrimmer {
    budget: Arc<dyn TokenBudget>,
}

impl ContextTrimmer {
    pub fn new(budget: Arc<dyn TokenBudget>) -> Self {
        Self { budget }
    }

    /// Drops context messages oldest first until
    /// `cost(init ++ context) + reserved < max_total_tokens`.
    ///
    /// When the context runs out first the result carries the init messages
    /// alone and [`TrimmedRequest::within_budget`] reports `false`.
    pub fn fit(
        &self,
        init_messages: &[Message],
        context_messages: &[Message],
        reserved_completion_tokens: usize,
        model: &str,
    ) -> ContextResult<TrimmedRequest> {
        let max_total_tokens = self.budget.profile(model)?.max_total_tokens;
        let init_len = init_messages.len();

        let mut messages = Vec::with_capacity(init_len + context_messages.len());
        messages.extend_from_slice(init_messages);
        messages.extend_from_slice(context_messages);

        let mut token_cost = self.budget.token_cost(&messages, model)?;
        let mut dropped = 0;

        while token_cost + reserved_completion_tokens >= max_total_tokens
            && messages.len() > init_len
        {
            let removed = messages.remove(init_len);
            dropped += 1;
            token_cost = self.budget.token_cost(&messages, model)?;
            debug!(
                role = %removed.role,
                chars = removed.content.len(),
                token_cost,
                "Dropped oldest context message"
            );
        }

        let trimmed = TrimmedRequest {
            messages,
            init_len,
            dropped,
            token_cost,
            reserved_completion_tokens,
            max_total_tokens,
        };

        if trimmed.within_budget() {
            debug!(
                model,
                kept = trimmed.context().len(),
                dropped,
                token_cost,
                max_total_tokens,
                "Fitted conversation into context window"
            );
        } else {
            warn!(
                model,
                token_cost,
                reserved_completion_tokens,
                max_total_tokens,
                "Init messages alone exceed the context window"
            );
        }

        Ok(trimmed)
    }
}
