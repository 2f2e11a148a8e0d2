use common::GenerationConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

mod error;
pub mod generation;
pub mod parsing;

pub use error::{GenerationError, GenerationResult};
pub use generation::{GenerationClient, LlmGenerationClient};
#[cfg(any(test, feature = "mocks"))]
pub use generation::MockGenerationClient;
pub use parsing::{parse_list_output, ListKind, MAX_LIST_ITEMS};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new("assistant", content)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
}

impl CompletionRequest {
    pub fn new(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            max_tokens: None,
            temperature: None,
            system_prompt: None,
        }
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = Some(prompt.to_string());
        self
    }
}

/// Клиент OpenAI-совместимого сервера (LM Studio, llama.cpp server, Ollama)
#[derive(Clone)]
pub struct LlmClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
    max_tokens: u32,
    temperature: f32,
}

// OpenAI API types
#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChatChoice>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIChatChoice {
    message: OpenAIMessage,
}

impl LlmClient {
    pub fn new(
        base_url: &str,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> GenerationResult<Self> {
        if base_url.trim().is_empty() {
            return Err(GenerationError::Configuration(
                "LLM base URL cannot be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout) // локальные модели бывают медленными
            .build()
            .map_err(|e| {
                GenerationError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: normalize_base_url(base_url),
            model: model.to_string(),
            client,
            max_tokens,
            temperature,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> GenerationResult<Self> {
        Self::new(
            &config.base_url,
            &config.model,
            config.max_tokens,
            config.temperature,
            config.timeout(),
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn complete(&self, request: CompletionRequest) -> GenerationResult<String> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(OpenAIMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let chat_request = OpenAIChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: Some(request.max_tokens.unwrap_or(self.max_tokens)),
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
        };

        info!("Sending request to local model: {} -> {}", self.base_url, self.model);
        debug!("Текст запроса: {}", request.prompt);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&chat_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Local LLM API error {}: {}", status, body);
            return Err(GenerationError::Api { status, body });
        }

        let chat_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(e.to_string()))?;

        match chat_response.choices.into_iter().next() {
            Some(choice) => {
                debug!("Received response from local model ({} chars)", choice.message.content.len());
                Ok(choice.message.content)
            }
            None => Err(GenerationError::EmptyResponse(self.model.clone())),
        }
    }

    /// Проверка доступности сервера: `GET /v1/models`
    pub async fn health_check(&self) -> bool {
        let response = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                debug!("LLM server health check: HEALTHY");
                true
            }
            Ok(resp) => {
                error!("LLM server health check failed: status {}", resp.status());
                false
            }
            Err(e) => {
                error!("LLM server health check failed: {}", e);
                false
            }
        }
    }
}

/// Убираем завершающий "/" и необязательный "/v1"
fn normalize_base_url(url: &str) -> String {
    let base = url.trim().trim_end_matches('/');
    base.strip_suffix("/v1").unwrap_or(base).to_string()
}
