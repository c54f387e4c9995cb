//! Model token budgets
//!
//! A [`TokenBudget`] answers the two questions window fitting needs: how many
//! tokens a model accepts in total, and how many tokens a given message list
//! costs for that model. Costs are conservative and not additive; chat
//! formatting adds framing tokens per message and per request.

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::context::Message;
use crate::error::{ContextError, ContextResult};

/// Framing tokens added around every message in the chat format
pub const TOKENS_PER_MESSAGE: usize = 4;

/// Tokens the model spends priming its reply
pub const REPLY_PRIMING_TOKENS: usize = 3;

/// Maximum context size of a model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub model_id: String,
    pub max_total_tokens: usize,
}

impl ModelProfile {
    pub fn new(model_id: impl Into<String>, max_total_tokens: usize) -> Self {
        Self {
            model_id: model_id.into(),
            max_total_tokens,
        }
    }
}

/// Token accounting for a family of models
pub trait TokenBudget: Send + Sync {
    /// Looks up the context size of `model`.
    fn profile(&self, model: &str) -> ContextResult<ModelProfile>;

    /// Counts the prompt tokens `messages` cost when sent to `model`.
    fn token_cost(&self, messages: &[Message], model: &str) -> ContextResult<usize>;
}

/// Read-only table of known model context sizes
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    profiles: Vec<ModelProfile>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            profiles: vec![
                ModelProfile::new("gpt-3.5-turbo", 4096),
                ModelProfile::new("gpt-3.5-turbo-16k", 16385),
                ModelProfile::new("gpt-4", 8192),
                ModelProfile::new("gpt-4-32k", 32768),
                ModelProfile::new("gpt-4-turbo", 128_000),
                ModelProfile::new("gpt-4o", 128_000),
                ModelProfile::new("gpt-4o-mini", 128_000),
            ],
        }
    }
}

impl ModelCatalog {
    pub fn empty() -> Self {
        Self {
            profiles: Vec::new(),
        }
    }

    /// Adds or replaces a profile.
    pub fn with_profile(mut self, profile: ModelProfile) -> Self {
        self.profiles.retain(|p| p.model_id != profile.model_id);
        self.profiles.push(profile);
        self
    }

    /// Resolves a model id, falling back to the longest known prefix so that
    /// dated snapshots (`gpt-4o-mini-2024-07-18`) map onto their family.
    pub fn lookup(&self, model: &str) -> ContextResult<ModelProfile> {
        if let Some(exact) = self.profiles.iter().find(|p| p.model_id == model) {
            return Ok(exact.clone());
        }

        self.profiles
            .iter()
            .filter(|p| model.starts_with(&p.model_id))
            .max_by_key(|p| p.model_id.len())
            .map(|p| ModelProfile::new(model, p.max_total_tokens))
            .ok_or_else(|| ContextError::UnknownModel(model.to_string()))
    }
}

/// Conservative token estimate for when no tokenizer is loaded.
///
/// ASCII text is counted at one token per four characters, rounded up. Every
/// other character counts one token per UTF-8 byte, which byte-level BPE
/// encodings never exceed.
pub fn estimate_tokens(text: &str) -> usize {
    let (ascii, other) = text.chars().fold((0usize, 0usize), |(ascii, other), c| {
        if c.is_ascii() {
            (ascii + 1, other)
        } else {
            (ascii, other + c.len_utf8())
        }
    });
    ascii.div_ceil(4) + other
}

/// Budget that estimates token counts from character length
#[derive(Debug, Clone, Default)]
pub struct EstimatedTokenBudget {
    catalog: ModelCatalog,
}

impl EstimatedTokenBudget {
    pub fn new(catalog: ModelCatalog) -> Self {
        Self { catalog }
    }
}

impl TokenBudget for EstimatedTokenBudget {
    fn profile(&self, model: &str) -> ContextResult<ModelProfile> {
        self.catalog.lookup(model)
    }

    fn token_cost(&self, messages: &[Message], _model: &str) -> ContextResult<usize> {
        let framed: usize = messages
            .iter()
            .map(|m| {
                TOKENS_PER_MESSAGE + estimate_tokens(m.role.as_str()) + estimate_tokens(&m.content)
            })
            .sum();
        Ok(framed + REPLY_PRIMING_TOKENS)
    }
}

/// BPE encoding used by a model family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiktokenEncoding {
    Cl100kBase,
    O200kBase,
}

impl TiktokenEncoding {
    /// `gpt-4o*` and the `o1`/`o3` reasoning models use `o200k_base`; the
    /// `gpt-3.5`/`gpt-4` families use `cl100k_base`.
    pub fn for_model(model: &str) -> Self {
        if model.starts_with("gpt-4o") || model.starts_with("o1") || model.starts_with("o3") {
            Self::O200kBase
        } else {
            Self::Cl100kBase
        }
    }
}

/// Exact token counts with the OpenAI BPE encodings
pub struct TiktokenBudget {
    catalog: ModelCatalog,
    cl100k: CoreBPE,
    o200k: CoreBPE,
}

impl TiktokenBudget {
    /// Loads both encodings. The rank tables ship inside `tiktoken-rs`, so
    /// this does not touch the network.
    pub fn new(catalog: ModelCatalog) -> ContextResult<Self> {
        let cl100k =
            tiktoken_rs::cl100k_base().map_err(|e| ContextError::TokenCountError(e.to_string()))?;
        let o200k =
            tiktoken_rs::o200k_base().map_err(|e| ContextError::TokenCountError(e.to_string()))?;
        Ok(Self {
            catalog,
            cl100k,
            o200k,
        })
    }

    fn encoder(&self, model: &str) -> &CoreBPE {
        match TiktokenEncoding::for_model(model) {
            TiktokenEncoding::Cl100kBase => &self.cl100k,
            TiktokenEncoding::O200kBase => &self.o200k,
        }
    }

    /// Token count of `text` under the encoding `model` uses.
    pub fn count(&self, text: &str, model: &str) -> usize {
        self.encoder(model).encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for TiktokenBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenBudget")
            .field("catalog", &self.catalog)
            .finish_non_exhaustive()
    }
}

impl TokenBudget for TiktokenBudget {
    fn profile(&self, model: &str) -> ContextResult<ModelProfile> {
        self.catalog.lookup(model)
    }

    fn token_cost(&self, messages: &[Message], model: &str) -> ContextResult<usize> {
        let encoder = self.encoder(model);
        let framed: usize = messages
            .iter()
            .map(|m| {
                TOKENS_PER_MESSAGE
                    + encoder.encode_with_special_tokens(m.role.as_str()).len()
                    + encoder.encode_with_special_tokens(&m.content).len()
            })
            .sum();
        Ok(framed + REPLY_PRIMING_TOKENS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_resolves_exact_and_snapshot_ids() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.lookup("gpt-3.5-turbo").unwrap().max_total_tokens, 4096);
        assert_eq!(catalog.lookup("gpt-4-0613").unwrap().max_total_tokens, 8192);

        let snapshot = catalog.lookup("gpt-4o-mini-2024-07-18").unwrap();
        assert_eq!(snapshot.model_id, "gpt-4o-mini-2024-07-18");
        assert_eq!(snapshot.max_total_tokens, 128_000);
    }

    #[test]
    fn catalog_rejects_unknown_models() {
        let err = ModelCatalog::default().lookup("llama-3").unwrap_err();
        assert_eq!(err, ContextError::UnknownModel("llama-3".to_string()));
    }

    #[test]
    fn with_profile_replaces_existing_entry() {
        let catalog = ModelCatalog::default().with_profile(ModelProfile::new("gpt-4", 100));
        assert_eq!(catalog.lookup("gpt-4").unwrap().max_total_tokens, 100);
    }

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("hi"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn estimate_counts_non_ascii_by_byte() {
        // Three bytes per CJK character
        assert_eq!(estimate_tokens("你好"), 6);
        assert_eq!(estimate_tokens("hi 你好"), 1 + 6);
    }

    #[test]
    fn encoding_follows_model_family() {
        assert_eq!(TiktokenEncoding::for_model("gpt-3.5-turbo"), TiktokenEncoding::Cl100kBase);
        assert_eq!(TiktokenEncoding::for_model("gpt-4-0613"), TiktokenEncoding::Cl100kBase);
        assert_eq!(TiktokenEncoding::for_model("gpt-4-turbo"), TiktokenEncoding::Cl100kBase);
        assert_eq!(TiktokenEncoding::for_model("gpt-4o"), TiktokenEncoding::O200kBase);
        assert_eq!(
            TiktokenEncoding::for_model("gpt-4o-mini-2024-07-18"),
            TiktokenEncoding::O200kBase
        );
    }

    #[test]
    fn tiktoken_cost_includes_framing_overhead() {
        let budget = TiktokenBudget::new(ModelCatalog::default()).unwrap();
        assert_eq!(budget.token_cost(&[], "gpt-4").unwrap(), REPLY_PRIMING_TOKENS);

        let messages = [Message::user("hi")];
        let expected = REPLY_PRIMING_TOKENS
            + TOKENS_PER_MESSAGE
            + budget.count("user", "gpt-4")
            + budget.count("hi", "gpt-4");
        assert_eq!(budget.token_cost(&messages, "gpt-4").unwrap(), expected);
    }

    #[test]
    fn estimate_never_undercounts_non_latin_text() {
        let exact = TiktokenBudget::new(ModelCatalog::default()).unwrap();
        let estimated = EstimatedTokenBudget::default();

        for content in [
            "这是一个用于测试分词器的中文句子，包含标点符号。".repeat(20),
            "日本語のテキストはトークンが多くなりがちです。".repeat(20),
            "Привет, как дела? Всё хорошо.".repeat(20),
            "🦀🚀✨🔥".repeat(20),
        ] {
            let messages = [Message::user(content.as_str())];
            for model in ["gpt-3.5-turbo", "gpt-4o"] {
                let real = exact.token_cost(&messages, model).unwrap();
                let guess = estimated.token_cost(&messages, model).unwrap();
                assert!(guess >= real, "{model}: estimate {guess} below real {real}");
            }
        }
    }

    #[test]
    fn cost_includes_framing_overhead() {
        let budget = EstimatedTokenBudget::default();
        let empty = budget.token_cost(&[], "gpt-4").unwrap();
        assert_eq!(empty, REPLY_PRIMING_TOKENS);

        // "user" = 1 token, "hi" = 1 token
        let one = budget.token_cost(&[Message::user("hi")], "gpt-4").unwrap();
        assert_eq!(one, REPLY_PRIMING_TOKENS + TOKENS_PER_MESSAGE + 2);
    }
}
