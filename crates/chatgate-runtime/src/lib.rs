//! Runtime abstractions for the upstream completion and moderation services.

use thiserror::Error;

pub mod completion;
pub mod mock;
pub mod moderation;
pub mod providers;

pub use completion::{CompletionRequest, CompletionService, CompletionStream};
pub use mock::{MockCompletionService, MockModerationService};
pub use moderation::{ModerationService, ModerationVerdict};
pub use providers::OpenAIClient;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("mock provider has no queued response")]
    MockQueueEmpty,
    #[error("transport error: {0}")]
    Transport(String),
    /// Upstream answered with a non-success status; `body` is its payload.
    #[error("upstream status {status}: {body}")]
    HttpStatus {
        status: u16,
        body: serde_json::Value,
    },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("client configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MockQueueEmpty => "mock_queue_empty",
            Self::Transport(_) => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::Decode(_) => "decode",
            Self::Config(_) => "config",
        }
    }

    /// Payload worth logging next to the error, if any.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::HttpStatus { body, .. } => Some(body),
            _ => None,
        }
    }
}
