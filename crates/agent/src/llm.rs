use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use supportline_core::config::{LlmConfig, LlmProvider};
use supportline_core::domain::conversation::Role;
use thiserror::Error;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm client could not be built: {0}")]
    Setup(String),
    #[error("llm request timed out after {0:?}")]
    Timeout(Duration),
    #[error("llm transport failed: {0}")]
    Transport(String),
    #[error("llm endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response was malformed: {0}")]
    MalformedResponse(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role: role.as_str(), content: content.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;
}

/// Chat-completions client for OpenAI and for Ollama's OpenAI-compatible
/// `/v1` surface.
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: String,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = match (config.provider, config.base_url.as_deref()) {
            (_, Some(base_url)) if !base_url.trim().is_empty() => base_url.trim().to_string(),
            (LlmProvider::OpenAi, _) => OPENAI_BASE_URL.to_string(),
            (LlmProvider::Ollama, _) => {
                return Err(LlmError::Setup("ollama provider requires a base url".to_string()))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|error| LlmError::Setup(error.to_string()))?;

        Ok(Self {
            http,
            endpoint: chat_completions_url(&base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: config.timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout(self.timeout)
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body: truncate(&body, 200) });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| LlmError::MalformedResponse(error.to_string()))?;
        completion_text(&payload)
    }
}

fn chat_completions_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/chat/completions")
    }
}

fn completion_text(payload: &Value) -> Result<String, LlmError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::MalformedResponse("missing choices[0].message.content".into()))
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use supportline_core::config::{LlmConfig, LlmProvider};

    use super::{chat_completions_url, completion_text, LlmError, OpenAiCompatibleClient};

    fn llm_config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some("sk-test".to_string().into()),
            base_url: base_url.map(str::to_string),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
            max_tokens: 150,
            temperature: 0.1,
        }
    }

    #[test]
    fn endpoint_defaults_to_openai_and_respects_base_url() {
        let openai = OpenAiCompatibleClient::from_config(&llm_config(LlmProvider::OpenAi, None))
            .expect("openai client");
        assert_eq!(openai.endpoint(), "https://api.openai.com/v1/chat/completions");

        let ollama = OpenAiCompatibleClient::from_config(&llm_config(
            LlmProvider::Ollama,
            Some("http://localhost:11434/v1/"),
        ))
        .expect("ollama client");
        assert_eq!(ollama.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(
            chat_completions_url("http://proxy/v1/chat/completions"),
            "http://proxy/v1/chat/completions"
        );
    }

    #[test]
    fn ollama_without_base_url_is_a_setup_error() {
        let result = OpenAiCompatibleClient::from_config(&llm_config(LlmProvider::Ollama, None));
        assert!(matches!(result, Err(LlmError::Setup(_))));
    }

    #[test]
    fn completion_text_reads_first_choice() {
        let payload = json!({
            "choices": [{"message": {"role": "assistant", "content": "{\"intent\": \"GREETING\"}"}}]
        });
        assert_eq!(completion_text(&payload).expect("content"), "{\"intent\": \"GREETING\"}");

        let empty = json!({"choices": []});
        assert!(matches!(completion_text(&empty), Err(LlmError::MalformedResponse(_))));
    }
}
