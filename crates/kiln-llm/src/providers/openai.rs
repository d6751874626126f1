use serde::{Deserialize, Serialize};
use tracing::debug;

use kiln_core::config::ModelConfig;
use kiln_core::error::{KilnError, Result};
use kiln_core::traits::{CompletionRequest, LanguageModel};

use super::{check_status, http_client, transport_error};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Client for OpenAI and any server exposing the same chat completions API
/// (Ollama, vLLM, OpenRouter and friends via `base_url`).
pub struct OpenAiClient {
    http: reqwest::blocking::Client,
    config: ModelConfig,
    name: String,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(&config)?,
            name: format!("{}/{}", config.provider, config.model_id),
            config,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(config: &'a ModelConfig, request: &'a CompletionRequest) -> ChatRequest<'a> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = request.system.as_deref() {
        messages.push(ChatMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(ChatMessage {
        role: "user",
        content: &request.prompt,
    });
    ChatRequest {
        model: &config.model_id,
        messages,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

fn response_text(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| KilnError::LlmRequest("response has no message content".into()))
}

impl LanguageModel for OpenAiClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);

        debug!(model = %self.config.model_id, url, "Sending chat completion request");
        let mut builder = self.http.post(url).json(&build_request(&self.config, request));
        // Local servers usually run without a key
        if let Some(key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().map_err(transport_error)?;
        let body: ChatResponse = check_status(response)?.json().map_err(transport_error)?;
        response_text(body)
    }
}
