//! Resilient, token-aware platform API invoker.
//!
//! Every call runs as a small state machine:
//!
//! ```text
//!            ┌──────────────┐  errcode 0 / absent   ┌───────────┐
//!   ┌──────► │  Attempting  │ ────────────────────► │ Succeeded │
//!   │        └──────────────┘                       └───────────┘
//!   │          │    │     │ other errcode
//!   │          │    │     └──────────────────────►  ┌───────────┐
//!   │  40014/42001  │ transport error               │ Exhausted │
//!   │          ↓    ↓          (budget spent) ───►  └───────────┘
//!   │  TokenInvalidRetry   BackingOff(n * base)
//!   └──────────┴───────────────┘
//! ```
//!
//! Token-expiry retries and transport retries draw from one shared budget.

mod request;

pub use request::{ApiPayload, ApiRequest, RequestBody};

use reqwest::{header::CONTENT_TYPE, multipart, Client};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{ClientConfig, CredentialScope};
use crate::error::GatewayError;
use crate::token::TokenStore;

/// Error codes meaning "access token invalid" (40014) and "access token
/// expired" (42001). These trigger invalidation and a retry.
pub const SESSION_EXPIRED_CODES: [i64; 2] = [40014, 42001];

pub fn is_session_expired(code: i64) -> bool {
    SESSION_EXPIRED_CODES.contains(&code)
}

/// Build the shared HTTP client with the per-attempt timeout.
pub fn build_http_client(config: &ClientConfig) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent("wecom-gateway/0.1")
        .build()
}

/// Retry budget and backoff unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
        }
    }
}

enum AttemptState {
    Attempting { attempt: u32 },
    TokenInvalidRetry { attempt: u32, code: i64 },
    BackingOff { attempt: u32, error: reqwest::Error },
    Succeeded(ApiPayload),
    Exhausted(GatewayError),
}

/// Platform API client.
pub struct ApiClient {
    http_client: Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        http_client: Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            tokens,
            retry,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Invoke with the configured retry budget.
    pub async fn invoke(
        &self,
        scope: &CredentialScope,
        request: &ApiRequest,
    ) -> Result<ApiPayload, GatewayError> {
        self.invoke_with_retries(scope, request, self.retry.max_retries)
            .await
    }

    /// Invoke with an explicit attempt budget (at least one attempt is made).
    ///
    /// # Errors
    /// - [`GatewayError::Token`] if no token can be obtained (not retried)
    /// - [`GatewayError::Api`] for a non-expiry error code, or an expiry code
    ///   on the last attempt
    /// - [`GatewayError::Transport`] once transport failures use up the budget
    pub async fn invoke_with_retries(
        &self,
        scope: &CredentialScope,
        request: &ApiRequest,
        max_retries: u32,
    ) -> Result<ApiPayload, GatewayError> {
        let max_attempts = max_retries.max(1);
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } => {
                    let token = self.tokens.get_token(scope).await?;
                    debug!(path = %request.path, attempt, "Invoking platform API");

                    match self.send_once(&token, request).await {
                        Ok(payload) => match payload.error_code() {
                            None | Some(0) => AttemptState::Succeeded(payload),
                            Some(code) => {
                                let error = GatewayError::Api {
                                    operation: request.path.clone(),
                                    code,
                                    message: payload.error_message(),
                                };
                                if is_session_expired(code) {
                                    self.tokens.invalidate(scope);
                                    if attempt < max_attempts {
                                        AttemptState::TokenInvalidRetry { attempt, code }
                                    } else {
                                        AttemptState::Exhausted(error)
                                    }
                                } else {
                                    AttemptState::Exhausted(error)
                                }
                            }
                        },
                        Err(error) if attempt < max_attempts => {
                            AttemptState::BackingOff { attempt, error }
                        }
                        Err(source) => AttemptState::Exhausted(GatewayError::Transport {
                            operation: request.path.clone(),
                            attempts: attempt,
                            source,
                        }),
                    }
                }
                AttemptState::TokenInvalidRetry { attempt, code } => {
                    warn!(path = %request.path, attempt, code, "Access token rejected, retrying with fresh token");
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::BackingOff { attempt, error } => {
                    let delay = self.retry.backoff_base * attempt;
                    warn!(
                        path = %request.path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Platform API call failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    AttemptState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                AttemptState::Succeeded(payload) => return Ok(payload),
                AttemptState::Exhausted(error) => return Err(error),
            };
        }
    }

    async fn send_once(
        &self,
        token: &str,
        request: &ApiRequest,
    ) -> Result<ApiPayload, reqwest::Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .query(&[("access_token", token)])
            .query(&request.query);

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Media { file_name, bytes } => {
                let part = multipart::Part::bytes(bytes.clone()).file_name(file_name.clone());
                builder.multipart(multipart::Form::new().part("media", part))
            }
        };

        let response = builder.send().await?.error_for_status()?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        Ok(ApiPayload::from_body(content_type, bytes.to_vec()))
    }
}
