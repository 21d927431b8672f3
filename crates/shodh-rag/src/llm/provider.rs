//! External LLM provider abstraction (C6). Grounded on the teacher's
//! `ExternalProvider`/`ApiProvider`: the same endpoint-dispatch-by-variant
//! shape and `parse_json_response` HTML-guard, narrowed to the closed set
//! of variants this crate actually talks to and with streaming/tool-calling
//! dropped (chat turns are request/response only).

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::GenerationParams;
use crate::error::RagError;
use crate::types::Role;

/// One message in a chat-shaped request to a provider.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Narrow provider contract: validate credentials, list models, and run
/// one request/response chat turn. No streaming, no tool-calling, no
/// in-process local inference — those belong to a host, not this core.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> &str;
    fn display_label(&self) -> &str;

    /// Cheap, local shape-check of credentials (non-empty where required).
    /// Does not make a network call.
    fn validate(&self, credentials: Option<&str>) -> Result<(), RagError>;

    /// A minimal authenticated call against the provider's models-list
    /// endpoint (or, where no such endpoint exists, the configured model
    /// echoed back). Used to confirm credentials actually work, not just
    /// that they're shaped right.
    async fn list_models(&self, credentials: Option<&str>) -> Result<Vec<String>, RagError>;

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        credentials: Option<&str>,
    ) -> Result<String, RagError>;
}

fn require_credentials(provider_id: &str, credentials: Option<&str>) -> Result<(), RagError> {
    match credentials {
        Some(c) if !c.trim().is_empty() => Ok(()),
        _ => Err(RagError::ConfigurationMismatch(format!(
            "provider '{provider_id}' requires credentials but none were supplied"
        ))),
    }
}

async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> anyhow::Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("failed to read response body from {endpoint}: {e}"))?;
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "endpoint {endpoint} returned HTML instead of JSON (HTTP {status}) — service may be down. Response: {preview}"
        ));
    }
    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!("failed to parse JSON from {endpoint} (HTTP {status}): {e}. Body: {preview}")
    })
}

fn build_client() -> Client {
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(15))
        .timeout(std::time::Duration::from_secs(300))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .expect("reqwest client builder never fails with this config")
}

fn messages_to_openai_json(messages: &[ChatMessage]) -> serde_json::Value {
    json!(messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({"role": role, "content": m.content})
        })
        .collect::<Vec<_>>())
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    text: String,
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModelEntry>,
}

#[derive(Deserialize)]
struct OllamaModelEntry {
    name: String,
}

#[derive(Deserialize)]
struct ModelListResponse {
    data: Vec<ModelListEntry>,
}

#[derive(Deserialize)]
struct ModelListEntry {
    id: String,
}

/// A local Ollama endpoint (OpenAI-compatible `/v1/chat/completions` shape).
/// No API key required by default — `credentials` is optional.
pub struct OllamaProvider {
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            model: model.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> &str {
        "ollama"
    }

    fn display_label(&self) -> &str {
        "Ollama (local inference endpoint)"
    }

    fn validate(&self, _credentials: Option<&str>) -> Result<(), RagError> {
        Ok(())
    }

    async fn list_models(&self, _credentials: Option<&str>) -> Result<Vec<String>, RagError> {
        let client = build_client();
        let tags_endpoint = self
            .endpoint
            .replace("/v1/chat/completions", "/api/tags");

        let response = client.get(&tags_endpoint).send().await.map_err(|e| RagError::Provider {
            provider: self.id().to_string(),
            source: anyhow!("failed to reach {tags_endpoint}: {e}"),
        })?;

        if !response.status().is_success() {
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("Ollama tags endpoint returned {}", response.status()),
            });
        }

        let result: OllamaTagsResponse =
            parse_json_response(response, &tags_endpoint)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;
        Ok(result.models.into_iter().map(|m| m.name).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        _credentials: Option<&str>,
    ) -> Result<String, RagError> {
        let client = build_client();
        let request = json!({
            "model": self.model,
            "messages": messages_to_openai_json(messages),
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "stream": false,
        });

        let response = client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {} failed: {e}", self.endpoint),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("Ollama error ({status}): {error}"),
            });
        }

        let result: OpenAiResponse = parse_json_response(response, &self.endpoint)
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: e,
            })?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("Ollama returned empty choices array".to_string()))
    }
}

/// Identifies which OpenAI-compatible HTTP endpoint to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAiCompatibleKind {
    OpenAi,
    OpenRouter,
    Together,
    Baseten,
}

/// OpenAI, OpenRouter, Together, and Baseten all speak the same
/// `/v1/chat/completions` request/response shape with a bearer token.
pub struct OpenAiCompatibleProvider {
    kind: OpenAiCompatibleKind,
    model: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(kind: OpenAiCompatibleKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            model: model.into(),
        }
    }

    fn endpoint(&self) -> &'static str {
        match self.kind {
            OpenAiCompatibleKind::OpenAi => "https://api.openai.com/v1/chat/completions",
            OpenAiCompatibleKind::OpenRouter => "https://openrouter.ai/api/v1/chat/completions",
            OpenAiCompatibleKind::Together => "https://api.together.xyz/v1/chat/completions",
            OpenAiCompatibleKind::Baseten => "https://inference.baseten.co/v1/chat/completions",
        }
    }

    fn models_endpoint(&self) -> &'static str {
        match self.kind {
            OpenAiCompatibleKind::OpenAi => "https://api.openai.com/v1/models",
            OpenAiCompatibleKind::OpenRouter => "https://openrouter.ai/api/v1/models",
            OpenAiCompatibleKind::Together => "https://api.together.xyz/v1/models",
            OpenAiCompatibleKind::Baseten => "https://inference.baseten.co/v1/models",
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatibleProvider {
    fn id(&self) -> &str {
        match self.kind {
            OpenAiCompatibleKind::OpenAi => "openai",
            OpenAiCompatibleKind::OpenRouter => "openrouter",
            OpenAiCompatibleKind::Together => "together",
            OpenAiCompatibleKind::Baseten => "baseten",
        }
    }

    fn display_label(&self) -> &str {
        match self.kind {
            OpenAiCompatibleKind::OpenAi => "OpenAI",
            OpenAiCompatibleKind::OpenRouter => "OpenRouter",
            OpenAiCompatibleKind::Together => "Together AI",
            OpenAiCompatibleKind::Baseten => "Baseten",
        }
    }

    fn validate(&self, credentials: Option<&str>) -> Result<(), RagError> {
        require_credentials(self.id(), credentials)
    }

    async fn list_models(&self, credentials: Option<&str>) -> Result<Vec<String>, RagError> {
        self.validate(credentials)?;
        let api_key = credentials.unwrap_or_default();
        let client = build_client();
        let endpoint = self.models_endpoint();

        let response = client
            .get(endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {endpoint} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("models list error ({status}): {error}"),
            });
        }

        let result: ModelListResponse =
            parse_json_response(response, endpoint)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;
        Ok(result.data.into_iter().map(|m| m.id).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        credentials: Option<&str>,
    ) -> Result<String, RagError> {
        self.validate(credentials)?;
        let api_key = credentials.unwrap_or_default();
        let client = build_client();
        let endpoint = self.endpoint();

        let request = json!({
            "model": self.model,
            "messages": messages_to_openai_json(messages),
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "frequency_penalty": params.repetition_penalty - 1.0,
            "stream": false,
        });

        let response = client
            .post(endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {endpoint} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("API error ({status}): {error}"),
            });
        }

        let result: OpenAiResponse =
            parse_json_response(response, endpoint)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Generation(format!("{} returned empty choices array", self.display_label())))
    }
}

/// Anthropic's native (non-OpenAI-shaped) messages API.
pub struct AnthropicProvider {
    model: String,
}

impl AnthropicProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn display_label(&self) -> &str {
        "Anthropic"
    }

    fn validate(&self, credentials: Option<&str>) -> Result<(), RagError> {
        require_credentials(self.id(), credentials)
    }

    async fn list_models(&self, credentials: Option<&str>) -> Result<Vec<String>, RagError> {
        self.validate(credentials)?;
        let api_key = credentials.unwrap_or_default();
        let client = build_client();
        const MODELS_ENDPOINT: &str = "https://api.anthropic.com/v1/models";

        let response = client
            .get(MODELS_ENDPOINT)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {MODELS_ENDPOINT} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("models list error ({status}): {error}"),
            });
        }

        #[derive(Deserialize)]
        struct AnthropicModelEntry {
            id: String,
        }
        #[derive(Deserialize)]
        struct AnthropicModelsResponse {
            data: Vec<AnthropicModelEntry>,
        }

        let result: AnthropicModelsResponse =
            parse_json_response(response, MODELS_ENDPOINT)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;
        Ok(result.data.into_iter().map(|m| m.id).collect())
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        credentials: Option<&str>,
    ) -> Result<String, RagError> {
        self.validate(credentials)?;
        let api_key = credentials.unwrap_or_default();
        let client = build_client();
        const ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

        // Anthropic takes the system prompt as a top-level field, not a message.
        let system_prompt = messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let turns: Vec<_> = messages.iter().filter(|m| m.role != Role::System).collect();

        let mut request = json!({
            "model": self.model,
            "messages": messages_to_openai_json(
                &turns.iter().map(|m| (*m).clone()).collect::<Vec<_>>()
            ),
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
        });
        if let Some(system) = system_prompt {
            request["system"] = json!(system);
        }

        let response = client
            .post(ENDPOINT)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {ENDPOINT} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("Anthropic API error ({status}): {error}"),
            });
        }

        let result: AnthropicResponse =
            parse_json_response(response, ENDPOINT)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;

        result
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| RagError::Generation("Anthropic returned empty content array".to_string()))
    }
}

/// Perplexity's chat endpoint defaults to web-search-augmented answers,
/// which this crate never wants: answers must be grounded only in the
/// retrieved library evidence, not a live web search. `disable_search`
/// documents that intent in the request body (Perplexity's API tolerates
/// unrecognized fields) alongside `return_related_questions: false`.
pub struct PerplexityProvider {
    model: String,
}

impl PerplexityProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

#[async_trait]
impl Provider for PerplexityProvider {
    fn id(&self) -> &str {
        "perplexity"
    }

    fn display_label(&self) -> &str {
        "Perplexity"
    }

    fn validate(&self, credentials: Option<&str>) -> Result<(), RagError> {
        require_credentials(self.id(), credentials)
    }

    /// Perplexity has no public models-list endpoint as of this writing, so
    /// this only confirms credentials are present and echoes the configured
    /// model back rather than making a network call.
    async fn list_models(&self, credentials: Option<&str>) -> Result<Vec<String>, RagError> {
        self.validate(credentials)?;
        Ok(vec![self.model.clone()])
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
        credentials: Option<&str>,
    ) -> Result<String, RagError> {
        self.validate(credentials)?;
        let api_key = credentials.unwrap_or_default();
        let client = build_client();
        const ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";

        let request = json!({
            "model": self.model,
            "messages": messages_to_openai_json(messages),
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "top_p": params.top_p,
            "return_related_questions": false,
            "disable_search": true,
            "stream": false,
        });

        let response = client
            .post(ENDPOINT)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("request to {ENDPOINT} failed: {e}"),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(RagError::Provider {
                provider: self.id().to_string(),
                source: anyhow!("Perplexity API error ({status}): {error}"),
            });
        }

        let result: OpenAiResponse =
            parse_json_response(response, ENDPOINT)
                .await
                .map_err(|e| RagError::Provider {
                    provider: self.id().to_string(),
                    source: e,
                })?;

        result
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::Generation("Perplexity returned empty choices array".to_string()))
    }
}

/// Construct the provider for a given id (spec.md §4.6's closed set).
pub fn provider_for_id(provider_id: &str, model: &str) -> Result<Box<dyn Provider>, RagError> {
    match provider_id {
        "ollama" => Ok(Box::new(OllamaProvider::new(model))),
        "openai" => Ok(Box::new(OpenAiCompatibleProvider::new(
            OpenAiCompatibleKind::OpenAi,
            model,
        ))),
        "openrouter" => Ok(Box::new(OpenAiCompatibleProvider::new(
            OpenAiCompatibleKind::OpenRouter,
            model,
        ))),
        "together" => Ok(Box::new(OpenAiCompatibleProvider::new(
            OpenAiCompatibleKind::Together,
            model,
        ))),
        "baseten" => Ok(Box::new(OpenAiCompatibleProvider::new(
            OpenAiCompatibleKind::Baseten,
            model,
        ))),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(model))),
        "perplexity" => Ok(Box::new(PerplexityProvider::new(model))),
        other => Err(RagError::ConfigurationMismatch(format!(
            "unknown provider id '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_id_is_configuration_mismatch() {
        let result = provider_for_id("not-a-provider", "model");
        assert!(matches!(result, Err(RagError::ConfigurationMismatch(_))));
    }

    #[test]
    fn ollama_validates_without_credentials() {
        let provider = OllamaProvider::new("llama3");
        assert!(provider.validate(None).is_ok());
    }

    #[test]
    fn openai_requires_credentials() {
        let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleKind::OpenAi, "gpt-4o");
        assert!(provider.validate(None).is_err());
        assert!(provider.validate(Some("sk-test")).is_ok());
    }
}
