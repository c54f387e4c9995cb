//! In-memory test doubles for the upstream services.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;

use crate::completion::{CompletionRequest, CompletionService, CompletionStream};
use crate::moderation::{ModerationService, ModerationVerdict};
use crate::ProviderError;

/// Completion service answering from a queue and recording every request
#[derive(Default)]
pub struct MockCompletionService {
    queue: Mutex<VecDeque<Result<CompletionStream, ProviderError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a stream that yields `chunks` one by one.
    pub fn enqueue_chunks<I, B>(&self, chunks: I)
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks: Vec<Result<Bytes, ProviderError>> =
            chunks.into_iter().map(|c| Ok(c.into())).collect();
        self.enqueue_stream(Box::pin(stream::iter(chunks)));
    }

    pub fn enqueue_stream(&self, stream: CompletionStream) {
        self.queue
            .lock()
            .expect("mock completion queue poisoned")
            .push_back(Ok(stream));
    }

    pub fn enqueue_error(&self, error: ProviderError) {
        self.queue
            .lock()
            .expect("mock completion queue poisoned")
            .push_back(Err(error));
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .expect("mock completion requests poisoned")
            .clone()
    }
}

#[async_trait]
impl CompletionService for MockCompletionService {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        self.requests
            .lock()
            .expect("mock completion requests poisoned")
            .push(req);

        self.queue
            .lock()
            .expect("mock completion queue poisoned")
            .pop_front()
            .unwrap_or(Err(ProviderError::MockQueueEmpty))
    }
}

/// Moderation service that flags inputs containing configured terms
#[derive(Debug, Default)]
pub struct MockModerationService {
    rules: Mutex<Vec<(String, Result<ModerationVerdict, ProviderError>)>>,
    inputs: Mutex<Vec<String>>,
}

impl MockModerationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flags any input containing `term` with the given categories.
    pub fn flag<I, S>(&self, term: impl Into<String>, categories: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .lock()
            .expect("mock moderation rules poisoned")
            .push((term.into(), Ok(ModerationVerdict::flagged(categories))));
    }

    /// Fails the check for any input containing `term`.
    pub fn fail_on(&self, term: impl Into<String>, error: ProviderError) {
        self.rules
            .lock()
            .expect("mock moderation rules poisoned")
            .push((term.into(), Err(error)));
    }

    /// Every input checked so far, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs
            .lock()
            .expect("mock moderation inputs poisoned")
            .clone()
    }
}

#[async_trait]
impl ModerationService for MockModerationService {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn moderate(&self, input: &str) -> Result<ModerationVerdict, ProviderError> {
        self.inputs
            .lock()
            .expect("mock moderation inputs poisoned")
            .push(input.to_string());

        let rules = self.rules.lock().expect("mock moderation rules poisoned");
        rules
            .iter()
            .find(|(term, _)| input.contains(term.as_str()))
            .map(|(_, outcome)| outcome.clone())
            .unwrap_or_else(|| Ok(ModerationVerdict::clean()))
    }
}

#[cfg(test)]
mod tests {
    use chatgate_context::Message;
    use futures::StreamExt;

    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest::streaming("mock-1", vec![Message::user("hello")], 64)
    }

    #[tokio::test]
    async fn mock_completion_emits_chunks_in_order() {
        let provider = MockCompletionService::new();
        provider.enqueue_chunks(["data: a\n\n", "data: b\n\n"]);

        let mut stream = provider.stream_completion(request()).await.unwrap();
        let first = stream.next().await.unwrap().unwrap();
        let second = stream.next().await.unwrap().unwrap();

        assert_eq!(first, Bytes::from_static(b"data: a\n\n"));
        assert_eq!(second, Bytes::from_static(b"data: b\n\n"));
        assert!(stream.next().await.is_none());
        assert_eq!(provider.requests(), vec![request()]);
    }

    #[tokio::test]
    async fn mock_completion_reports_empty_queue() {
        let provider = MockCompletionService::new();

        let err = provider.stream_completion(request()).await.err().unwrap();

        assert_eq!(err, ProviderError::MockQueueEmpty);
    }

    #[tokio::test]
    async fn mock_completion_returns_queued_error() {
        let provider = MockCompletionService::new();
        provider.enqueue_error(ProviderError::Transport("upstream timeout".to_string()));

        let err = provider.stream_completion(request()).await.err().unwrap();

        assert_eq!(err, ProviderError::Transport("upstream timeout".to_string()));
    }

    #[tokio::test]
    async fn mock_moderation_flags_matching_terms() {
        let moderation = MockModerationService::new();
        moderation.flag("forbidden", ["hate"]);

        assert!(!moderation.moderate("all good").await.unwrap().flagged);
        let verdict = moderation.moderate("a forbidden word").await.unwrap();
        assert!(verdict.flagged);
        assert_eq!(verdict.categories.get("hate"), Some(&true));
        assert_eq!(moderation.inputs(), vec!["all good", "a forbidden word"]);
    }
}
