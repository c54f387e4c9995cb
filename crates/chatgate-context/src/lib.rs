//! Chatgate Context - conversation types and context window fitting
//!
//! This crate provides:
//! - Chat message and role types
//! - Model token budgets (exact via tiktoken, or a conservative estimate)
//! - Context window fitting that drops the oldest turns first

pub mod budget;
pub mod context;
pub mod error;
pub mod window;

pub use budget::{
    EstimatedTokenBudget, ModelCatalog, ModelProfile, TiktokenBudget, TiktokenEncoding, TokenBudget,
};
pub use context::{last_user_message, Message, Role};
pub use error::{ContextError, ContextResult};
pub use window::{ContextTrimmer, TrimmedRequest};

/// Prelude for common imports
pub mod prelude {
    pub use crate::budget::{
        EstimatedTokenBudget, ModelCatalog, ModelProfile, TiktokenBudget, TokenBudget,
    };
    pub use crate::context::{Message, Role};
    pub use crate::error::{ContextError, ContextResult};
    pub use crate::window::{ContextTrimmer, TrimmedRequest};
}
