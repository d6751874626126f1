pub mod anthropic;
pub mod openai;

use std::time::Duration;

use kiln_core::config::ModelConfig;
use kiln_core::error::{KilnError, Result};

pub(crate) fn http_client(config: &ModelConfig) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| KilnError::LlmRequest(format!("client setup: {}", e)))
}

/// Turn a non-success response into an error carrying the status code.
pub(crate) fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(KilnError::LlmRequest(format!("HTTP {}: {}", status.as_u16(), body)))
}

pub(crate) fn transport_error(e: reqwest::Error) -> KilnError {
    if e.is_timeout() {
        KilnError::LlmRequest(format!("timeout: {}", e))
    } else if e.is_connect() {
        KilnError::LlmRequest(format!("connection failed: {}", e))
    } else {
        KilnError::LlmRequest(e.to_string())
    }
}
