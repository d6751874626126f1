use serde::{Deserialize, Serialize};
use tracing::debug;

use kiln_core::config::ModelConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::traits::{CompletionRequest, LanguageModel};

use super::{check_status, http_client, transport_error};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicClient {
    http: reqwest::blocking::Client,
    config: ModelConfig,
    name: String,
}

impl AnthropicClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(&config)?,
            name: format!("{}/{}", config.provider, config.model_id),
            config,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<ApiMessage<'a>>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize, Debug)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

fn build_request<'a>(config: &'a ModelConfig, request: &'a CompletionRequest) -> AnthropicRequest<'a> {
    AnthropicRequest {
        model: &config.model_id,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        system: request.system.as_deref(),
        messages: vec![ApiMessage {
            role: "user",
            content: &request.prompt,
        }],
    }
}

fn response_text(response: AnthropicResponse) -> Result<String> {
    let text: Vec<String> = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .map(|block| block.text)
        .collect();
    if text.is_empty() {
        return Err(KilnError::LlmRequest("response has no text content".into()));
    }
    Ok(text.concat())
}

impl LanguageModel for AnthropicClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self.config.base_url.as_deref().unwrap_or(ANTHROPIC_API_URL);
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| KilnError::LlmRequest("Anthropic API key not configured".into()))?;

        debug!(model = %self.config.model_id, "Sending Anthropic request");
        let response = self
            .http
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&build_request(&self.config, request))
            .send()
            .map_err(transport_error)?;
        let body: AnthropicResponse = check_status(response)?.json().map_err(transport_error)?;
        response_text(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ModelConfig {
        ModelConfig {
            provider: "anthropic".into(),
            model_id: "claude-test".into(),
            api_key: None,
            base_url: None,
            max_tokens: 256,
            temperature: 0.5,
            timeout_secs: 5,
            retry: None,
        }
    }

    #[test]
    fn test_request_shape() {
        let config = config();
        let request = CompletionRequest::new("Summarize").with_system("Be brief");
        let json = serde_json::to_value(build_request(&config, &request)).unwrap();
        assert_eq!(json["model"], "claude-test");
        assert_eq!(json["max_tokens"], 256);
        assert_eq!(json["system"], "Be brief");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Summarize");

        let bare = serde_json::to_value(build_request(&config, &CompletionRequest::new("x"))).unwrap();
        assert!(bare.get("system").is_none());
    }

    #[test]
    fn test_response_text_joins_text_blocks() {
        let body: AnthropicResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"Hello "},{"type":"tool_use","id":"t"},{"type":"text","text":"world"}]}"#,
        )
        .unwrap();
        assert_eq!(response_text(body).unwrap(), "Hello world");

        let empty: AnthropicResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(response_text(empty).is_err());
    }

    #[test]
    fn test_missing_key_fails_before_sending() {
        let client = AnthropicClient::new(config()).unwrap();
        let err = client.complete(&CompletionRequest::new("x")).unwrap_err();
        assert!(err.to_string().contains("API key"));
    }
}
