//! Moderation gate in front of the completion call
//!
//! One moderation check per message, all issued together and joined before
//! anything is sent upstream. In-flight checks are never cancelled; a flagged
//! verdict only stops the completion request.

use std::sync::Arc;
use std::time::Instant;

use chatgate_context::Message;
use chatgate_runtime::{ModerationService, ModerationVerdict, ProviderError};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::metrics::{FLAGGED_MESSAGES, MODERATION_LATENCY, UPSTREAM_ERRORS};

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("Flagged content")]
    Flagged(ModerationVerdict),
    #[error("moderation check failed: {0}")]
    Moderation(#[source] ProviderError),
}

impl From<SafetyError> for GatewayError {
    fn from(err: SafetyError) -> Self {
        match err {
            SafetyError::Flagged(verdict) => {
                let data = serde_json::to_value(&verdict).unwrap_or_default();
                GatewayError::user_with_data("Flagged content", data)
            }
            SafetyError::Moderation(source) => {
                let data = source
                    .payload()
                    .cloned()
                    .unwrap_or_else(|| serde_json::Value::String(source.to_string()));
                GatewayError::application_with_data("Failed to moderate content", data)
            }
        }
    }
}

#[derive(Clone)]
pub struct SafetyGate {
    moderation: Arc<dyn ModerationService>,
}

impl SafetyGate {
    pub fn new(moderation: Arc<dyn ModerationService>) -> Self {
        Self { moderation }
    }

    /// Checks every message and hands the list back untouched when all pass.
    ///
    /// Results come back from the barrier in message order, so when several
    /// messages are flagged the earliest one's verdict is surfaced. A flagged
    /// verdict wins over a failed check.
    pub async fn check_all(&self, messages: Vec<Message>) -> Result<Vec<Message>, SafetyError> {
        let started = Instant::now();
        let outcomes = join_all(
            messages
                .iter()
                .map(|message| self.moderation.moderate(&message.content)),
        )
        .await;
        MODERATION_LATENCY.observe(started.elapsed().as_secs_f64());

        let flagged = outcomes
            .iter()
            .enumerate()
            .find_map(|(index, outcome)| match outcome {
                Ok(verdict) if verdict.flagged => Some((index, verdict)),
                _ => None,
            });
        if let Some((index, verdict)) = flagged {
            FLAGGED_MESSAGES.inc();
            warn!(
                index,
                categories = ?verdict.categories,
                "Message flagged by moderation"
            );
            return Err(SafetyError::Flagged(verdict.clone()));
        }

        if let Some(err) = outcomes.into_iter().find_map(Result::err) {
            UPSTREAM_ERRORS
                .with_label_values(&["moderation", err.kind()])
                .inc();
            return Err(SafetyError::Moderation(err));
        }

        debug!(
            checked = messages.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All messages passed moderation"
        );
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatgate_runtime::MockModerationService;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("hello"),
            Message::assistant("hi, how can I help?"),
            Message::user("tell me something nice"),
        ]
    }

    #[tokio::test]
    async fn clean_messages_pass_unchanged() {
        let moderation = Arc::new(MockModerationService::new());
        let gate = SafetyGate::new(moderation.clone());

        let messages = gate.check_all(conversation()).await.unwrap();

        assert_eq!(messages, conversation());
        assert_eq!(moderation.inputs().len(), 3);
    }

    #[tokio::test]
    async fn any_flagged_position_fails_the_gate() {
        for position in 0..3 {
            let mut messages = conversation();
            messages[position].content.push_str(" [bad]");

            let moderation = Arc::new(MockModerationService::new());
            moderation.flag("[bad]", ["harassment"]);
            let gate = SafetyGate::new(moderation.clone());

            match gate.check_all(messages).await {
                Err(SafetyError::Flagged(verdict)) => {
                    assert!(verdict.flagged);
                    assert_eq!(verdict.categories.get("harassment"), Some(&true));
                }
                other => panic!("expected flagged error at {position}, got {other:?}"),
            }
            // Sibling checks still ran
            assert_eq!(moderation.inputs().len(), 3);
        }
    }

    #[tokio::test]
    async fn earliest_flagged_verdict_is_surfaced() {
        let moderation = Arc::new(MockModerationService::new());
        moderation.flag("first", ["violence"]);
        moderation.flag("second", ["hate"]);
        let gate = SafetyGate::new(moderation);

        let err = gate
            .check_all(vec![
                Message::user("first problem"),
                Message::user("second problem"),
            ])
            .await
            .unwrap_err();

        match err {
            SafetyError::Flagged(verdict) => {
                assert!(verdict.categories.contains_key("violence"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn flagged_wins_over_failed_check() {
        let moderation = Arc::new(MockModerationService::new());
        moderation.fail_on("broken", ProviderError::Transport("reset".to_string()));
        moderation.flag("bad", ["hate"]);
        let gate = SafetyGate::new(moderation);

        let err = gate
            .check_all(vec![Message::user("broken"), Message::user("bad")])
            .await
            .unwrap_err();

        assert!(matches!(err, SafetyError::Flagged(_)));
    }

    #[tokio::test]
    async fn failed_check_is_an_application_error() {
        let moderation = Arc::new(MockModerationService::new());
        moderation.fail_on(
            "hello",
            ProviderError::HttpStatus {
                status: 503,
                body: serde_json::json!({ "error": "overloaded" }),
            },
        );
        let gate = SafetyGate::new(moderation);

        let err = gate.check_all(conversation()).await.unwrap_err();
        let gateway_err = GatewayError::from(err);

        assert_eq!(gateway_err.kind(), "application_error");
        assert_eq!(
            gateway_err.data(),
            Some(&serde_json::json!({ "error": "overloaded" }))
        );
    }

    #[test]
    fn flagged_maps_to_user_error_with_verdict() {
        let err = GatewayError::from(SafetyError::Flagged(ModerationVerdict::flagged(["hate"])));

        assert_eq!(err.kind(), "user_error");
        assert_eq!(err.to_string(), "Flagged content");
        assert_eq!(
            err.data(),
            Some(&serde_json::json!({ "flagged": true, "categories": { "hate": true } }))
        );
    }
}
