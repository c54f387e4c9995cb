//! Content moderation service

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ProviderError;

/// Policy classification of one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub flagged: bool,
    #[serde(default)]
    pub categories: BTreeMap<String, bool>,
}

impl ModerationVerdict {
    pub fn clean() -> Self {
        Self::default()
    }

    /// Flagged verdict with the given categories set.
    pub fn flagged<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            flagged: true,
            categories: categories.into_iter().map(|c| (c.into(), true)).collect(),
        }
    }
}

#[async_trait]
pub trait ModerationService: Send + Sync {
    fn name(&self) -> &'static str;

    async fn moderate(&self, input: &str) -> Result<ModerationVerdict, ProviderError>;
}
