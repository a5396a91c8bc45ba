use async_trait::async_trait;

use crate::error::Result;

/// A chat model that turns a system + user prompt into text.
///
/// Implemented by each provider client and by the rotation wrappers, so a
/// `ProviderChain` can mix single clients and rotating pools.
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Provider label used in logs and fallback outcomes.
    fn name(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
