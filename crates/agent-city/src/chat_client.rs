//! Client for OpenAI-compatible chat completions APIs.
//!
//! Works against the hosted OpenAI endpoint or any server exposing
//! `/v1/chat/completions` (vLLM, llama.cpp server, LM Studio).
//! Requests carry a bearer token when one is configured.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default endpoint when `OPENAI_BASE_URL` is not set.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Default model for every agent.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Chat completions client.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

/// A chat message with role and content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Options for a single completion.
#[derive(Debug, Clone)]
pub struct ChatRequestOptions {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the server to return a single JSON object
    pub json_object: bool,
}

/// Completion text plus token accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Request body for /v1/chat/completions.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

/// Response from /v1/chat/completions.
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    // Some servers send null content on refusals
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl ChatClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url` - Server root, e.g. "https://api.openai.com" or "http://localhost:8000"
    /// * `api_key` - Bearer token; omitted from requests when `None`
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Build a client from `OPENAI_BASE_URL` and `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url, std::env::var("OPENAI_API_KEY").ok())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn api_url(&self, endpoint: &str) -> String {
        // Accept roots given with or without the /v1 suffix
        if self.base_url.ends_with("/v1") {
            format!("{}/{endpoint}", self.base_url)
        } else {
            format!("{}/v1/{endpoint}", self.base_url)
        }
    }

    fn completions_url(&self) -> String {
        self.api_url("chat/completions")
    }

    fn models_url(&self) -> String {
        self.api_url("models")
    }

    /// Run one system + user completion.
    pub async fn complete(&self, options: ChatRequestOptions) -> Result<ChatCompletion> {
        let request = ChatRequest {
            model: options.model,
            messages: vec![
                ChatMessage::system(options.system_prompt),
                ChatMessage::user(options.user_prompt),
            ],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            response_format: options
                .json_object
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let url = self.completions_url();
        debug!(url = %url, model = %request.model, json = options.json_object, "Chat request");

        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send request to chat completions server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat request failed with status {}: {}", status, body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completions response")?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("No choices in chat completions response")?;

        let (prompt_tokens, completion_tokens) = chat_response
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        debug!(prompt_tokens, completion_tokens, chars = content.len(), "Chat response");

        Ok(ChatCompletion {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    /// Check whether the server answers on `/v1/models`.
    pub async fn health_check(&self) -> Result<bool> {
        let mut builder = self.client.get(self.models_url());
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        match builder.send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Fail unless the server answers the health check.
    pub async fn ensure_available(&self) -> Result<()> {
        if !self.health_check().await? {
            anyhow::bail!("Chat server at {} is not reachable", self.base_url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = ChatClient::new("http://localhost:8000", None);
        assert_eq!(client.base_url(), "http://localhost:8000");

        // Trailing slash removed
        let client = ChatClient::new("http://localhost:8000/", None);
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn test_completions_url() {
        let client = ChatClient::new("https://api.openai.com", None);
        assert_eq!(
            client.completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );

        let client = ChatClient::new("http://localhost:8000/v1/", None);
        assert_eq!(
            client.completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_models_url() {
        let client = ChatClient::new("https://api.openai.com", None);
        assert_eq!(client.models_url(), "https://api.openai.com/v1/models");

        let client = ChatClient::new("http://localhost:8000/v1", None);
        assert_eq!(client.models_url(), "http://localhost:8000/v1/models");
    }

    #[tokio::test]
    async fn test_health_check_unreachable_server() {
        // Port 9 (discard) is not served locally; the connection is refused
        let client = ChatClient::new("http://127.0.0.1:9", None);
        assert!(!client.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_available_names_server() {
        let client = ChatClient::new("http://127.0.0.1:9", None);
        let err = client.ensure_available().await.unwrap_err();
        assert!(err.to_string().contains("http://127.0.0.1:9"));
    }

    #[test]
    fn test_blank_key_dropped() {
        let client = ChatClient::new(DEFAULT_BASE_URL, Some("  ".to_string()));
        assert!(client.api_key.is_none());
    }

    #[test]
    fn test_request_serialization() {
        let request = ChatRequest {
            model: DEFAULT_MODEL.to_string(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user("hi")],
            temperature: 0.2,
            max_tokens: None,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn test_response_without_usage() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "ok"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.usage.is_none());
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("ok"));
    }

    #[tokio::test]
    #[ignore = "requires a running chat completions server"]
    async fn test_live_completion() {
        let client = ChatClient::from_env();
        let completion = client
            .complete(ChatRequestOptions {
                model: DEFAULT_MODEL.to_string(),
                system_prompt: "Reply with the single word OK.".to_string(),
                user_prompt: "Ready?".to_string(),
                temperature: 0.0,
                max_tokens: Some(5),
                json_object: false,
            })
            .await
            .unwrap();
        assert!(!completion.content.is_empty());
    }
}
