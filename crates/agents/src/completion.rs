use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_ERROR_BODY_BYTES: usize = 2 * 1024;

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl CompletionConfig {
    /// Reads `PROMPTLY_COMPLETION_*` variables. Without
    /// `PROMPTLY_COMPLETION_URL` completions stay disabled.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let endpoint = env::var("PROMPTLY_COMPLETION_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let api_key = env::var("PROMPTLY_COMPLETION_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty());

        let timeout = env::var("PROMPTLY_COMPLETION_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        let max_retries = env::var("PROMPTLY_COMPLETION_MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(defaults.max_retries);

        let initial_backoff = env::var("PROMPTLY_COMPLETION_RETRY_INITIAL_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff);

        Self {
            endpoint,
            api_key,
            timeout,
            max_retries,
            initial_backoff,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion endpoint is not configured")]
    NotConfigured,

    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("completion endpoint returned status {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("completion endpoint returned an empty response")]
    EmptyResponse,

    #[error("completion endpoint returned an unreadable body: {0}")]
    InvalidBody(String),
}

impl CompletionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Upstream { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Opaque AI backend: structured prompt in, free text out.
pub trait CompletionClient: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn complete(&self, xml_prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    xml_prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    response: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    initial_backoff: Duration,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(endpoint: impl Into<String>, config: &CompletionConfig) -> Result<Self, CompletionError> {
        let http = reqwest::Client::builder()
            .user_agent("promptly/completion")
            .connect_timeout(Duration::from_secs(6))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: config.api_key.clone(),
            max_retries: config.max_retries,
            initial_backoff: config.initial_backoff,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn attempt(&self, xml_prompt: &str) -> Result<String, CompletionError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&CompletionRequest { xml_prompt });
        if let Some(api_key) = self.api_key.as_deref() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Upstream {
                status: status.as_u16(),
                body: truncate_body(body),
            });
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::InvalidBody(err.to_string()))?;

        body.response
            .filter(|text| !text.trim().is_empty())
            .ok_or(CompletionError::EmptyResponse)
    }
}

impl CompletionClient for HttpCompletionClient {
    fn is_configured(&self) -> bool {
        true
    }

    async fn complete(&self, xml_prompt: &str) -> Result<String, CompletionError> {
        let mut retries = 0_u32;
        let mut backoff = self.initial_backoff;

        loop {
            match self.attempt(xml_prompt).await {
                Ok(text) => return Ok(text),
                Err(err) if retries < self.max_retries && err.is_retryable() => {
                    retries += 1;
                    warn!(
                        endpoint = %self.endpoint,
                        retry = retries,
                        error = %err,
                        "completion attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Concrete client used by the binaries; `Disabled` when no endpoint is set.
#[derive(Debug, Clone)]
pub enum Completer {
    Http(HttpCompletionClient),
    Disabled,
}

impl Completer {
    pub fn from_config(config: &CompletionConfig) -> Result<Self, CompletionError> {
        match config.endpoint.as_deref() {
            Some(endpoint) => Ok(Self::Http(HttpCompletionClient::new(endpoint, config)?)),
            None => Ok(Self::Disabled),
        }
    }
}

impl CompletionClient for Completer {
    fn is_configured(&self) -> bool {
        matches!(self, Completer::Http(_))
    }

    async fn complete(&self, xml_prompt: &str) -> Result<String, CompletionError> {
        match self {
            Completer::Http(client) => client.complete(xml_prompt).await,
            Completer::Disabled => Err(CompletionError::NotConfigured),
        }
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY_BYTES {
        let mut end = MAX_ERROR_BODY_BYTES;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}
