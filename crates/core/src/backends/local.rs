use crate::embeddings::endpoint_url;
use crate::error::GenerationError;
use crate::models::BackendKind;
use crate::traits::{GenerationBackend, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const BACKEND: &str = "local model";
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// A model served on this machine through an Ollama-compatible HTTP API.
///
/// The model sees a raw prompt; chat role markers are applied here so the
/// caller only ever passes plain system and user text.
pub struct LocalModelBackend {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    raw: bool,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl LocalModelBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
        })
    }

    async fn installed_models(&self) -> Result<Vec<String>, GenerationError> {
        let response = self
            .client
            .get(endpoint_url(&self.endpoint, "api/tags")?)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("model listing returned {}", response.status()),
            });
        }
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|tag| tag.name).collect())
    }
}

#[async_trait]
impl GenerationBackend for LocalModelBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn load(&self) -> Result<(), GenerationError> {
        let installed = self
            .installed_models()
            .await
            .map_err(|error| GenerationError::Load(error.to_string()))?;
        if !installed.iter().any(|name| tag_matches(name, &self.model)) {
            return Err(GenerationError::Load(format!(
                "model {} is not installed on {}",
                self.model, self.endpoint
            )));
        }
        info!(model = %self.model, endpoint = %self.endpoint, "local model available");
        Ok(())
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let prompt = format_chat_prompt(&request.system_prompt, &request.prompt);
        let body = GenerateRequest {
            model: &self.model,
            prompt: &prompt,
            raw: true,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(model = %self.model, prompt_chars = prompt.len(), "calling local model");
        let response = self
            .client
            .post(endpoint_url(&self.endpoint, "api/generate")?)
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

        let parsed: GenerateResponse = response.json().await?;
        let answer = assistant_reply(&parsed.response);
        if answer.is_empty() {
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "model produced no text".to_string(),
            });
        }
        Ok(answer)
    }

    async fn is_available(&self) -> bool {
        match self.installed_models().await {
            Ok(installed) => installed.iter().any(|name| tag_matches(name, &self.model)),
            Err(_) => false,
        }
    }
}

/// `tinyllama` matches `tinyllama:latest`.
fn tag_matches(installed: &str, wanted: &str) -> bool {
    installed == wanted
        || installed
            .split_once(':')
            .is_some_and(|(base, _)| base == wanted)
}

pub(crate) fn format_chat_prompt(system_prompt: &str, prompt: &str) -> String {
    format!(
        "<|system|>\n{}</s>\n<|user|>\n{}</s>\n<|assistant|>\n",
        system_prompt.trim(),
        prompt.trim()
    )
}

/// Cuts the reply at the first end-of-turn or role marker the model emits.
fn assistant_reply(raw: &str) -> String {
    let end = ["</s>", "<|user|>", "<|system|>", "<|assistant|>"]
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .unwrap_or(raw.len());
    raw[..end].trim().to_string()
}
