//! Completion client for the Gemini `generateContent` API

use std::time::Duration;

use aeonis_core::chat::{CompletionEngine, CompletionRequest, Message};
use aeonis_core::config::LlmConfig;
use aeonis_core::{Secret, Secrets};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use url::Url;

use crate::wire::{ErrorEnvelope, GenerateContentRequest, GenerateContentResponse};
use crate::{Error, Result};

/// Header carrying the API key
const API_KEY_HEADER: &str = "x-goog-api-key";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for a function-calling completion model
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Secret,
    model: String,
    endpoint: Url,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// `<base_url>/models/<model>:generateContent`
fn endpoint_url(base_url: &str, model: &str) -> Result<Url> {
    let model = model.trim();
    if model.is_empty() || model.contains('/') {
        return Err(Error::Endpoint(format!("Invalid model name '{}'", model)));
    }

    let mut url = Url::parse(base_url.trim())
        .map_err(|e| Error::Endpoint(format!("Invalid base URL '{}': {}", base_url, e)))?;

    url.path_segments_mut()
        .map_err(|_| Error::Endpoint(format!("Base URL '{}' cannot take a path", base_url)))?
        .pop_if_empty()
        .push("models")
        .push(&format!("{}:generateContent", model));

    Ok(url)
}

/// Map a non-success response to an error
fn status_error(status: StatusCode, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().chars().take(200).collect());

    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Auth(message),
        StatusCode::BAD_REQUEST if message.contains("API key not valid") => Error::Auth(message),
        _ => Error::Api {
            status: status.as_u16(),
            message,
        },
    }
}

impl GeminiClient {
    /// Create a client for `model` served under `base_url`
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Secret) -> Result<Self> {
        if api_key.is_blank() {
            return Err(Error::Auth("API key is empty".to_string()));
        }

        let model = model.into();
        let endpoint = endpoint_url(base_url, &model)?;
        let http = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        info!(model = %model, "Created completion client");

        Ok(Self {
            http,
            api_key,
            model,
            endpoint,
        })
    }

    /// Create a client from configuration and stored secrets
    ///
    /// The key comes from `AEONIS_LLM_API_KEY` or `~/.config/aeonis/secrets.toml`.
    pub fn from_config(config: &LlmConfig, secrets: &Secrets) -> Result<Self> {
        let api_key = secrets.llm_api_key().ok_or_else(|| {
            Error::Auth(
                "Completion API key not found. Set AEONIS_LLM_API_KEY environment variable \
                 or add llm.api_key to ~/.config/aeonis/secrets.toml"
                    .to_string(),
            )
        })?;

        Self::new(&config.base_url, config.model.clone(), api_key)
    }

    /// Replace the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Model identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full `generateContent` URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send one `generateContent` call
    pub async fn generate(&self, request: &CompletionRequest<'_>) -> Result<Option<Message>> {
        let body = GenerateContentRequest::from_request(request);

        debug!(
            model = %self.model,
            messages = body.contents.len(),
            tools = request.tools.len(),
            "Sending completion request"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let err = status_error(status, &text);
            warn!(status = status.as_u16(), error = %err, "Completion request rejected");
            return Err(err);
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| Error::Parse(e.to_string()))?;

        if let Some(usage) = &parsed.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                "Completion received"
            );
        }

        Ok(parsed.into_message())
    }
}

#[async_trait]
impl CompletionEngine for GeminiClient {
    async fn complete(&self, request: CompletionRequest<'_>) -> aeonis_core::Result<Option<Message>> {
        self.generate(&request).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        let url = endpoint_url(
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-flash-latest",
        )
        .unwrap();
        assert_eq!(
            url.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash-latest:generateContent"
        );

        let trailing = endpoint_url("http://localhost:8080/v1/", "m").unwrap();
        assert_eq!(trailing.as_str(), "http://localhost:8080/v1/models/m:generateContent");

        assert!(matches!(endpoint_url("not a url", "m"), Err(Error::Endpoint(_))));
        assert!(matches!(endpoint_url("http://localhost", " "), Err(Error::Endpoint(_))));
        assert!(matches!(endpoint_url("http://localhost", "a/b"), Err(Error::Endpoint(_))));
    }

    #[test]
    fn test_key_stays_out_of_url_and_debug() {
        let client = GeminiClient::new(
            "https://generativelanguage.googleapis.com/v1beta",
            "gemini-1.5-flash-latest",
            Secret::new("AIzaSecretKey"),
        )
        .unwrap();

        assert!(!client.endpoint().as_str().contains("AIzaSecretKey"));
        assert!(!format!("{:?}", client).contains("AIzaSecretKey"));
        assert_eq!(client.model(), "gemini-1.5-flash-latest");
    }

    #[test]
    fn test_blank_key_is_rejected() {
        let result = GeminiClient::new("http://localhost", "m", Secret::new("  "));
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error": {"code": 429, "message": "Resource exhausted", "status": "RESOURCE_EXHAUSTED"}}"#;
        match status_error(StatusCode::TOO_MANY_REQUESTS, body) {
            Error::RateLimited(message) => assert_eq!(message, "Resource exhausted"),
            other => panic!("unexpected {:?}", other),
        }

        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key."}}"#;
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, body), Error::Auth(_)));
        assert!(matches!(status_error(StatusCode::FORBIDDEN, "{}"), Error::Auth(_)));

        match status_error(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") {
            Error::Api { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_completion_error() {
        let client = GeminiClient::new("http://127.0.0.1:9", "m", Secret::new("sekrit-value"))
            .unwrap()
            .with_timeout(Duration::from_secs(2))
            .unwrap();

        let history = vec![Message::user("hello")];
        let request = CompletionRequest {
            system: "",
            tools: &[],
            history: &history,
        };

        let err = client.complete(request).await.unwrap_err();
        assert!(matches!(err, aeonis_core::Error::Completion(_)));
        assert!(!err.to_string().contains("sekrit-value"));
    }
}
