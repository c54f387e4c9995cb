//! Chatgate Gateway
//!
//! This crate implements the HTTP boundary of Chatgate, handling:
//! - Request validation
//! - Moderation of every inbound message
//! - Context window fitting
//! - Streaming relay of the upstream completion

pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod router;
pub mod safety;

pub use config::GatewayConfig;
pub use error::{ErrorBody, GatewayError};
pub use proxy::{CompletionProxy, ProxySettings};
pub use router::{build_routes, AppState};
pub use safety::{SafetyError, SafetyGate};

/// Gateway version
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");
