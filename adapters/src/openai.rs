use crate::classify::{classify_status, classify_transport};
use async_trait::async_trait;
use credentials::CredentialPool;
use errors::{ErrorKind, ProviderError};
use scribe_core::{
    EmbeddingProvider, GenerationProvider, GenerationRequest, GenerationResponse, TokenUsage
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error)
}

/// HTTP plumbing shared by the generation and embedding providers.
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    client: reqwest::Client
}

impl OpenAiClient {
    pub fn new(base_url: &str) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        api_key: &str,
        body: &B
    ) -> Result<R, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &headers, &body);
            debug!(url = %url, status = status.as_u16(), kind = %error.kind, "Provider rejected request");
            return Err(error);
        }

        let text = response.text().await.map_err(|e| classify_transport(&e))?;
        serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(format!("unexpected response body: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
    strict: bool
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseFormat<'a> {
    JsonSchema { json_schema: JsonSchemaFormat<'a> }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64
}

/// Chat-completions generation endpoint.
pub struct OpenAiGenerationProvider {
    client: OpenAiClient
}

impl OpenAiGenerationProvider {
    pub fn new(client: OpenAiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGenerationProvider {
    async fn generate(
        &self,
        api_key: &str,
        request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_instruction.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt
        });

        let body = ChatRequest {
            model: &request.model,
            messages,
            response_format: request
                .response_schema
                .as_ref()
                .map(|schema| ResponseFormat::JsonSchema {
                    json_schema: JsonSchemaFormat {
                        name: "response",
                        schema,
                        strict: false
                    }
                })
        };

        let response: ChatResponse = self
            .client
            .post("chat/completions", api_key, &body)
            .await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::malformed("response has no choices"))?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderError::new(
                ErrorKind::ContentPolicyBlocked,
                "generation stopped by the content filter"
            ));
        }
        let text = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed("response has no content"))?;

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        Ok(GenerationResponse { text, usage })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>
}

/// Embeddings endpoint. Draws its key from the shared credential pool and
/// reports each outcome back to it.
pub struct OpenAiEmbeddingProvider {
    client: OpenAiClient,
    model: String,
    credentials: Arc<CredentialPool>
}

impl OpenAiEmbeddingProvider {
    pub fn new(client: OpenAiClient, model: impl Into<String>, credentials: Arc<CredentialPool>) -> Self {
        Self {
            client,
            model: model.into(),
            credentials
        }
    }

    async fn request(&self, api_key: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text
        };
        let response: EmbeddingResponse = self.client.post("embeddings", api_key, &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::malformed("embedding response has no data"))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let credential = self
            .credentials
            .acquire()
            .map_err(|e| ProviderError::new(ErrorKind::NoCredentialAvailable, e.to_string()))?;

        let result = self.request(credential.secret(), text).await;
        let kind = result.as_ref().err().map(|e| e.kind);
        if let Err(e) = self.credentials.report_outcome(credential.id(), kind) {
            debug!(error = %e, "Credential vanished before its outcome was recorded");
        }
        result
    }
}
