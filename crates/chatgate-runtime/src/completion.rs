//! Streaming chat completion service

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chatgate_context::Message;
use futures::Stream;
use serde::Serialize;

use crate::ProviderError;

/// Raw event-stream bytes as they arrive from upstream
pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// Chat completion request, serialized as the upstream request body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl CompletionRequest {
    /// Streaming request with temperature 0.
    pub fn streaming(model: impl Into<String>, messages: Vec<Message>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature: 0.0,
            stream: true,
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submits the request and resolves once upstream has answered with
    /// headers. The body is handed back unread so callers can relay it
    /// incrementally; dropping the stream releases the upstream connection.
    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_request_body() {
        let req = CompletionRequest::streaming("gpt-3.5-turbo", vec![Message::user("hi")], 1024);
        let body = serde_json::to_value(&req).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-3.5-turbo",
                "messages": [{ "role": "user", "content": "hi" }],
                "max_tokens": 1024,
                "temperature": 0.0,
                "stream": true
            })
        );
    }
}
