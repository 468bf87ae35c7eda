//! Anthropic-family API client
//!
//! One client speaks three endpoint shapes of the same wire dialect:
//! the direct API, AWS Bedrock, and Google Vertex. Endpoint rewriting
//! changes the URL, the auth headers and where the model id lives; the
//! request/response bodies and the SSE stream are identical.

use crate::error::AnthropicError;
use crate::messages::{Message, MessageCreateParams};
use crate::streaming::MessageStream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Default API base URL
const DEFAULT_API_BASE: &str = "https://api.anthropic.com";

/// Default API version header
const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Streams can be long-lived
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

// ============================================================================
// Endpoint rewriting
// ============================================================================

/// Which concrete endpoint serves the Anthropic dialect
#[derive(Debug, Clone)]
pub enum Endpoint {
    /// The direct API (or any compatible proxy)
    Direct { base_url: String },

    /// AWS Bedrock runtime. The model id lives in the URL; the body carries
    /// `anthropic_version: "bedrock-2023-05-31"` instead of `model`.
    Bedrock { region: String },

    /// Google Vertex. Model and project/location live in the URL; the body
    /// carries `anthropic_version: "vertex-2023-10-16"`.
    Vertex { project: String, location: String },
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::Direct {
            base_url: DEFAULT_API_BASE.to_string(),
        }
    }
}

impl Endpoint {
    /// Build the request URL for the given model and mode
    pub fn url(&self, model: &str, streaming: bool) -> String {
        match self {
            Endpoint::Direct { base_url } => {
                format!("{}/v1/messages", base_url.trim_end_matches('/'))
            }
            Endpoint::Bedrock { region } => {
                let verb = if streaming {
                    "invoke-with-response-stream"
                } else {
                    "invoke"
                };
                format!(
                    "https://bedrock-runtime.{}.amazonaws.com/model/{}/{}",
                    region, model, verb
                )
            }
            Endpoint::Vertex { project, location } => {
                let verb = if streaming {
                    "streamRawPredict"
                } else {
                    "rawPredict"
                };
                format!(
                    "https://{loc}-aiplatform.googleapis.com/v1/projects/{proj}/locations/{loc}/publishers/anthropic/models/{model}:{verb}",
                    loc = location,
                    proj = project,
                    model = model,
                    verb = verb
                )
            }
        }
    }

    /// Rewrite the request body for this endpoint: URL-addressed endpoints
    /// drop the `model` field and gain an `anthropic_version` marker.
    pub fn rewrite_params(&self, params: &mut MessageCreateParams) {
        match self {
            Endpoint::Direct { .. } => {}
            Endpoint::Bedrock { .. } => {
                params.model = None;
                params.anthropic_version = Some("bedrock-2023-05-31".to_string());
            }
            Endpoint::Vertex { .. } => {
                params.model = None;
                params.anthropic_version = Some("vertex-2023-10-16".to_string());
            }
        }
    }
}

/// How credentials reach the endpoint
#[derive(Clone)]
pub enum Auth {
    /// `x-api-key` header (direct API)
    ApiKey(String),
    /// `Authorization: Bearer` (OAuth tokens, Bedrock API keys, Vertex)
    Bearer(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Auth::ApiKey(_) => write!(f, "Auth::ApiKey([REDACTED])"),
            Auth::Bearer(_) => write!(f, "Auth::Bearer([REDACTED])"),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Anthropic-family API client
#[derive(Debug, Clone)]
pub struct Anthropic {
    client: reqwest::Client,
    auth: Auth,
    endpoint: Endpoint,
    api_version: String,
    extra_headers: HashMap<String, String>,
    extra_body: serde_json::Map<String, Value>,
}

impl Anthropic {
    /// Create a client for the direct API with an API key
    pub fn new(api_key: impl Into<String>) -> Result<Self, AnthropicError> {
        Self::builder().auth(Auth::ApiKey(api_key.into())).build()
    }

    pub fn builder() -> AnthropicBuilder {
        AnthropicBuilder::default()
    }

    /// The configured endpoint
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn headers(&self) -> Result<HeaderMap, AnthropicError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(&self.api_version)
                .map_err(|e| AnthropicError::Configuration(e.to_string()))?,
        );
        match &self.auth {
            Auth::ApiKey(key) => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key)
                        .map_err(|_| AnthropicError::Configuration("invalid api key".into()))?,
                );
            }
            Auth::Bearer(token) => {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|_| AnthropicError::Configuration("invalid token".into()))?,
                );
            }
        }
        for (name, value) in &self.extra_headers {
            let name = HeaderName::try_from(name.as_str()).map_err(|e| {
                AnthropicError::Configuration(format!("invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                AnthropicError::Configuration(format!("invalid header value: {}", e))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Serialize params and merge configured extra body fields
    fn body(&self, params: &MessageCreateParams) -> Result<Value, AnthropicError> {
        let mut body = serde_json::to_value(params)?;
        if let Some(obj) = body.as_object_mut() {
            for (k, v) in &self.extra_body {
                obj.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        Ok(body)
    }

    /// Non-streaming message creation
    pub async fn create(
        &self,
        model: &str,
        mut params: MessageCreateParams,
    ) -> Result<Message, AnthropicError> {
        self.endpoint.rewrite_params(&mut params);
        params.stream = None;

        let url = self.endpoint.url(model, false);
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&self.body(&params)?)
            .send()
            .await
            .map_err(AnthropicError::from_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = crate::streaming::retry_after_header(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AnthropicError::from_status(
                status.as_u16(),
                &body,
                retry_after,
            ));
        }

        response
            .json::<Message>()
            .await
            .map_err(|e| AnthropicError::InvalidResponse(e.to_string()))
    }

    /// Streaming message creation
    ///
    /// The request is sent and its status checked before the stream is
    /// returned, so pre-flight errors (auth, rate limits, context-limit
    /// overruns) surface here with their full body text.
    pub async fn stream(
        &self,
        model: &str,
        mut params: MessageCreateParams,
    ) -> Result<MessageStream, AnthropicError> {
        self.endpoint.rewrite_params(&mut params);
        params.stream = Some(true);

        let url = self.endpoint.url(model, true);
        MessageStream::connect(&self.client, &url, self.headers()?, self.body(&params)?).await
    }
}

/// Builder for [`Anthropic`]
#[derive(Default)]
pub struct AnthropicBuilder {
    auth: Option<Auth>,
    endpoint: Option<Endpoint>,
    api_version: Option<String>,
    extra_headers: HashMap<String, String>,
    extra_body: serde_json::Map<String, Value>,
    timeout: Option<Duration>,
}

impl AnthropicBuilder {
    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint = Some(Endpoint::Direct {
            base_url: base_url.into(),
        });
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn extra_body(mut self, fields: serde_json::Map<String, Value>) -> Self {
        self.extra_body = fields;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<Anthropic, AnthropicError> {
        let auth = self
            .auth
            .ok_or_else(|| AnthropicError::Configuration("no credentials configured".into()))?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| AnthropicError::Configuration(e.to_string()))?;

        Ok(Anthropic {
            client,
            auth,
            endpoint: self.endpoint.unwrap_or_default(),
            api_version: self
                .api_version
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            extra_headers: self.extra_headers,
            extra_body: self.extra_body,
        })
    }
}
