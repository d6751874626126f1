pub mod providers;
pub mod retry;

use std::sync::Arc;

use kiln_core::config::ModelConfig;
use kiln_core::error::Result;
use kiln_core::traits::LanguageModel;

pub use providers::anthropic::AnthropicClient;
pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create a blocking client for one model configuration.
pub fn create_client(config: &ModelConfig) -> Result<Box<dyn LanguageModel>> {
    match config.provider.as_str() {
        "anthropic" | "claude" => Ok(Box::new(AnthropicClient::new(config.clone())?)),
        // Everything else speaks the OpenAI chat completions dialect
        _ => Ok(Box::new(OpenAiClient::new(config.clone())?)),
    }
}

/// The model a workspace queries: the primary with retries, then each fallback once.
pub fn create_model(
    primary: &ModelConfig,
    fallbacks: &[ModelConfig],
) -> Result<Arc<dyn LanguageModel>> {
    let retry = primary.retry.clone().unwrap_or_default();
    let fallbacks = fallbacks
        .iter()
        .map(create_client)
        .collect::<Result<Vec<_>>>()?;
    if fallbacks.is_empty() && primary.retry.is_none() {
        return Ok(Arc::from(create_client(primary)?));
    }
    Ok(Arc::new(RetryingClient::new(
        create_client(primary)?,
        fallbacks,
        retry,
    )))
}
