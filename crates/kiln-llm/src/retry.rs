use std::time::Duration;

use tracing::{info, warn};

use kiln_core::config::RetryConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::traits::{CompletionRequest, LanguageModel};

/// A model that retries failed requests and falls back to alternative providers.
pub struct RetryingClient {
    name: String,
    primary: Box<dyn LanguageModel>,
    fallbacks: Vec<Box<dyn LanguageModel>>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LanguageModel>,
        fallbacks: Vec<Box<dyn LanguageModel>>,
        retry_config: RetryConfig,
    ) -> Self {
        let name = match fallbacks.len() {
            0 => primary.name().to_string(),
            1 => format!("{} (+1 fallback)", primary.name()),
            n => format!("{} (+{} fallbacks)", primary.name(), n),
        };
        Self {
            name,
            primary,
            fallbacks,
            retry_config,
        }
    }

    fn complete_with_sleep(
        &self,
        request: &CompletionRequest,
        sleep: impl Fn(Duration),
    ) -> Result<String> {
        let max_retries = self.retry_config.max_retries;

        let mut last_err = None;
        for attempt in 0..=max_retries {
            match self.primary.complete(request) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    if is_retryable(&e) && attempt < max_retries {
                        let backoff = calculate_backoff(attempt, &self.retry_config);
                        warn!(
                            model = %self.primary.name(),
                            attempt = attempt + 1,
                            max_retries,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %e,
                            "Retrying LLM request"
                        );
                        sleep(backoff);
                        last_err = Some(e);
                        continue;
                    }
                    last_err = Some(e);
                    break;
                }
            }
        }

        if !self.fallbacks.is_empty() {
            info!("Primary LLM exhausted, trying fallback models");
        }
        for fallback in &self.fallbacks {
            match fallback.complete(request) {
                Ok(text) => {
                    info!(model = %fallback.name(), "Fell back to alternative model");
                    return Ok(text);
                }
                Err(e) => {
                    warn!(model = %fallback.name(), error = %e, "Fallback model also failed");
                }
            }
        }

        Err(last_err.unwrap_or_else(|| KilnError::LlmRequest("All providers failed".into())))
    }
}

impl LanguageModel for RetryingClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        self.complete_with_sleep(request, std::thread::sleep)
    }
}

fn is_retryable(e: &KilnError) -> bool {
    match e {
        KilnError::LlmRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    let ms = config
        .initial_backoff_ms
        .saturating_mul(factor)
        .min(config.max_backoff_ms);
    // Jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
