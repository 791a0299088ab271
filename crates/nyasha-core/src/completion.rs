use async_trait::async_trait;

use crate::Result;

/// Port for the generative language model.
///
/// Implementations return the model's reply trimmed of surrounding whitespace and
/// fail with [`crate::Error::Completion`] on transport/API failure, an unexpected
/// response shape, or an empty reply. They never retry.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
