//! Token issuance against the platform's `gettoken` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{IssuedToken, TokenSource};
use crate::config::CredentialScope;
use crate::error::TokenError;

/// `gettoken` response
#[derive(Deserialize, Debug)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Fetches tokens over HTTP.
pub struct HttpTokenSource {
    http_client: Client,
    base_url: String,
}

impl HttpTokenSource {
    /// `http_client` should carry the per-request timeout.
    pub fn new(http_client: Client, base_url: impl Into<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn issue(&self, scope: &CredentialScope) -> Result<IssuedToken, TokenError> {
        let url = format!("{}/gettoken", self.base_url);

        tracing::debug!(corp_id = %scope.corp_id, "Requesting access token from {}", url);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("corpid", scope.corp_id.as_str()),
                ("corpsecret", scope.corp_secret.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        if body.errcode != 0 {
            return Err(TokenError::Rejected {
                code: body.errcode,
                message: body.errmsg,
            });
        }

        let access_token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| TokenError::Malformed("missing access_token".to_string()))?;

        Ok(IssuedToken {
            access_token,
            expires_in: body.expires_in.filter(|secs| *secs > 0),
        })
    }
}
