//! Text-generation capability used by the structured extraction pass.

use crate::error::MemSyncResult;
use async_trait::async_trait;

/// Best-effort text generation. Output is not guaranteed to be valid JSON.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for `message` under `system_prompt`.
    async fn generate(&self, system_prompt: &str, message: &str) -> MemSyncResult<String>;
}
