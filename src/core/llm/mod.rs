mod generic_provider;

pub use generic_provider::GenericProvider;

use anyhow::Result;
use async_trait::async_trait;

/// Text-completion endpoint used by the execution loop. No retry policy is
/// applied here; callers bound each call with their own timeout.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str, model_id: &str) -> Result<String>;
}
