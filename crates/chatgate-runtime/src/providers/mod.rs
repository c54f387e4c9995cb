//! Upstream service implementations
//!
//! Concrete clients implementing [`CompletionService`](crate::CompletionService)
//! and [`ModerationService`](crate::ModerationService).

pub mod openai;

pub use openai::OpenAIClient;
