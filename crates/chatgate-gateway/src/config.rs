//! Process-wide gateway configuration, fixed at startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chatgate_context::{
    ContextResult, EstimatedTokenBudget, Message, ModelCatalog, TiktokenBudget, TokenBudget,
};
use chatgate_runtime::providers::openai::OPENAI_API_BASE;
use clap::{Parser, ValueEnum};

use crate::proxy::ProxySettings;

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_RESERVED_COMPLETION_TOKENS: u32 = 1024;

/// Environment variable holding the upstream credential
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// How prompt tokens are counted
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TokenCounter {
    /// Exact counts with the model's BPE encoding
    Tiktoken,
    /// Conservative estimate from character length
    Estimate,
}

#[derive(Clone, Parser)]
#[command(
    name = "chatgate-gateway",
    version,
    about = "Moderated, context-fitted streaming proxy for chat completions"
)]
pub struct GatewayConfig {
    #[arg(long, env = "CHATGATE_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: SocketAddr,

    /// Upstream credential. Without it the gateway starts but fails every
    /// chat request.
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_BASE", default_value = OPENAI_API_BASE)]
    pub openai_api_base: String,

    #[arg(long, env = "OPENAI_ORGANIZATION")]
    pub openai_organization: Option<String>,

    #[arg(long, env = "CHATGATE_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(
        long,
        env = "CHATGATE_RESERVED_COMPLETION_TOKENS",
        default_value_t = DEFAULT_RESERVED_COMPLETION_TOKENS
    )]
    pub reserved_completion_tokens: u32,

    /// Sent as a system message ahead of every conversation
    #[arg(long, env = "CHATGATE_SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    #[arg(
        long,
        env = "CHATGATE_TOKEN_COUNTER",
        value_enum,
        default_value_t = TokenCounter::Tiktoken
    )]
    pub token_counter: TokenCounter,

    #[arg(long, env = "CHATGATE_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHATGATE_LOG_JSON")]
    pub log_json: bool,
}

impl GatewayConfig {
    /// The credential, treating an empty value as absent.
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn token_budget(&self) -> ContextResult<Arc<dyn TokenBudget>> {
        let catalog = ModelCatalog::default();
        let budget: Arc<dyn TokenBudget> = match self.token_counter {
            TokenCounter::Tiktoken => Arc::new(TiktokenBudget::new(catalog)?),
            TokenCounter::Estimate => Arc::new(EstimatedTokenBudget::new(catalog)),
        };
        Ok(budget)
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        let init_messages = self
            .system_prompt
            .iter()
            .filter(|prompt| !prompt.trim().is_empty())
            .map(Message::system)
            .collect();

        ProxySettings {
            model: self.model.clone(),
            reserved_completion_tokens: self.reserved_completion_tokens,
            init_messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> GatewayConfig {
        GatewayConfig::try_parse_from(std::iter::once("chatgate-gateway").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let config = parse(&["--openai-api-key", "sk-test"]);

        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.reserved_completion_tokens, DEFAULT_RESERVED_COMPLETION_TOKENS);
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.token_counter, TokenCounter::Tiktoken);
        assert!(config.proxy_settings().init_messages.is_empty());
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = parse(&["--openai-api-key", "  "]);
        assert!(config.api_key().is_none());

        let config = parse(&["--openai-api-key", "sk-test"]);
        assert_eq!(config.api_key(), Some("sk-test"));
    }

    #[test]
    fn system_prompt_becomes_init_message() {
        let config = parse(&[
            "--openai-api-key",
            "sk-test",
            "--system-prompt",
            "  Answer briefly. ",
            "--model",
            "gpt-4o",
        ]);

        let settings = config.proxy_settings();
        assert_eq!(settings.model, "gpt-4o");
        assert_eq!(settings.init_messages, vec![Message::system("Answer briefly.")]);
    }

    #[test]
    fn token_counter_selects_budget() {
        let messages = [Message::user("这是一个句子。")];

        let exact = parse(&["--openai-api-key", "sk-test"]).token_budget().unwrap();
        let estimate = parse(&["--openai-api-key", "sk-test", "--token-counter", "estimate"])
            .token_budget()
            .unwrap();

        assert_eq!(exact.profile(DEFAULT_MODEL).unwrap().max_total_tokens, 4096);
        let exact_cost = exact.token_cost(&messages, DEFAULT_MODEL).unwrap();
        let estimated_cost = estimate.token_cost(&messages, DEFAULT_MODEL).unwrap();
        assert!(estimated_cost > exact_cost);
    }
}
