use crate::embeddings::endpoint_url;
use crate::error::GenerationError;
use crate::models::BackendKind;
use crate::traits::{GenerationBackend, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

const BACKEND: &str = "remote chat";

/// Chat-completions client for any OpenAI-compatible endpoint.
pub struct RemoteChatBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteChatBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty()),
            model: model.into(),
        })
    }

    fn completions_url(&self) -> Result<Url, GenerationError> {
        Ok(endpoint_url(&self.endpoint, "chat/completions")?)
    }
}

#[async_trait]
impl GenerationBackend for RemoteChatBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn load(&self) -> Result<(), GenerationError> {
        if self.api_key.is_none() {
            return Err(GenerationError::Load(format!(
                "no API key configured for {}",
                self.model
            )));
        }
        self.completions_url()
            .map_err(|error| GenerationError::Load(error.to_string()))?;
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let api_key = self.api_key.as_deref().ok_or(GenerationError::NotLoaded)?;
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            "calling chat completions"
        );
        let response = self
            .client
            .post(self.completions_url()?)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {text}"),
            });
        }

        let parsed: ChatResponse = response.json().await?;
        answer_from(parsed)
    }

    async fn is_available(&self) -> bool {
        self.api_key.is_some() && self.completions_url().is_ok()
    }
}

fn answer_from(response: ChatResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or_else(|| GenerationError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response contained no message content".to_string(),
        })
}
