//! OpenAI API client
//!
//! Implements [`CompletionService`] over the Chat Completions API with
//! streaming enabled, and [`ModerationService`] over the Moderations API.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::completion::{CompletionRequest, CompletionService, CompletionStream};
use crate::moderation::{ModerationService, ModerationVerdict};
use crate::ProviderError;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    /// Only the connect phase is bounded; a total timeout would cut off
    /// long completion streams.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            organization: None,
        })
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let builder = self.client.post(self.endpoint(path)).bearer_auth(&self.api_key);
        match &self.organization {
            Some(org) => builder.header("OpenAI-Organization", org),
            None => builder,
        }
    }
}

#[derive(Debug, Serialize)]
struct ModerationRequestBody<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModerationResponseBody {
    results: Vec<ModerationVerdict>,
}

/// Turns a non-success response into [`ProviderError::HttpStatus`], keeping
/// the upstream payload as JSON when it is JSON.
async fn status_error(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read body>".to_string());
    let body = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
    ProviderError::HttpStatus { status, body }
}

#[async_trait]
impl CompletionService for OpenAIClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn stream_completion(
        &self,
        req: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        debug!(
            model = %req.model,
            messages = req.messages.len(),
            max_tokens = req.max_tokens,
            "Submitting chat completion"
        );

        let response = self
            .post("/chat/completions")
            .json(&req)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map_err(|e| ProviderError::Transport(e.to_string())),
        ))
    }
}

#[async_trait]
impl ModerationService for OpenAIClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn moderate(&self, input: &str) -> Result<ModerationVerdict, ProviderError> {
        let response = self
            .post("/moderations")
            .json(&ModerationRequestBody { input })
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body: ModerationResponseBody = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        body.results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Decode("moderation response had no results".to_string()))
    }
}
