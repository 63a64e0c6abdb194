use async_trait::async_trait;

use crate::errors::ModelError;
use crate::llm::types::{CallConfig, ChatMessage, ModelTurn};

/// Unified model backend trait. Backends differ only in endpoint, auth, and
/// request/response envelope; the agent loop depends on this trait alone.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Returns the provider's identifier (matches the config.toml key).
    fn name(&self) -> &str;

    /// One blocking completion call: full conversation in, one turn out.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        cfg: &CallConfig,
    ) -> Result<ModelTurn, ModelError>;
}
