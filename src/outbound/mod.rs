//! Outbound messaging on top of [`ApiClient`].
//!
//! [`Messenger`] maps each platform operation (send, upload, download,
//! directory lookups) to one resilient invocation. [`OutboundAdapter`] is the
//! surface the dispatch pipeline uses to deliver replies.

mod target;

pub use target::{
    chunk_text, detect_media_kind, file_name_from_url, is_remote_url, local_media_path,
    normalize_target, MediaKind,
};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::{ApiClient, ApiPayload, ApiRequest};
use crate::config::CredentialScope;
use crate::error::GatewayError;

/// Maximum characters per text message
pub const TEXT_CHUNK_LIMIT: usize = 2048;

/// Result of a message send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub chat_id: String,
}

/// Credential health check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub corp_id: Option<String>,
    pub agent_id: Option<String>,
}

/// Platform operations for one credential scope.
pub struct Messenger {
    client: Arc<ApiClient>,
    scope: CredentialScope,
}

impl Messenger {
    pub fn new(client: Arc<ApiClient>, scope: CredentialScope) -> Self {
        Self { client, scope }
    }

    pub fn scope(&self) -> &CredentialScope {
        &self.scope
    }

    async fn invoke_json(&self, request: ApiRequest) -> Result<Value, GatewayError> {
        let payload = self.client.invoke(&self.scope, &request).await?;
        payload.into_json().ok_or_else(|| GatewayError::Api {
            operation: request.path,
            code: -1,
            message: "expected a JSON response".to_string(),
        })
    }

    async fn send_message(
        &self,
        to: &str,
        msgtype: &str,
        content: Value,
    ) -> Result<SendReceipt, GatewayError> {
        let to = normalize_target(to).ok_or_else(|| GatewayError::InvalidTarget(to.to_string()))?;

        let mut body = json!({
            "touser": to,
            "agentid": self.scope.agent_id,
            "msgtype": msgtype,
        });
        body[msgtype] = content;

        let response = self
            .invoke_json(ApiRequest::post_json("/message/send", body))
            .await?;

        let message_id = ["msgid", "invaliduser"]
            .iter()
            .filter_map(|key| response.get(*key).and_then(Value::as_str))
            .find(|v| !v.is_empty())
            .unwrap_or("unknown")
            .to_string();

        debug!(to = %to, msgtype, message_id = %message_id, "Message sent");
        Ok(SendReceipt {
            message_id,
            chat_id: to,
        })
    }

    pub async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        self.send_message(to, "text", json!({ "content": text })).await
    }

    /// The platform has no markdown cards for app messages; sent as text.
    pub async fn send_markdown(&self, to: &str, text: &str) -> Result<SendReceipt, GatewayError> {
        self.send_text(to, text).await
    }

    pub async fn send_image(&self, to: &str, media_id: &str) -> Result<SendReceipt, GatewayError> {
        self.send_message(to, "image", json!({ "media_id": media_id })).await
    }

    pub async fn send_file(&self, to: &str, media_id: &str) -> Result<SendReceipt, GatewayError> {
        self.send_message(to, "file", json!({ "media_id": media_id })).await
    }

    /// Upload temporary media and return its `media_id`.
    pub async fn upload_media(
        &self,
        kind: MediaKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, GatewayError> {
        let request = ApiRequest::upload("/media/upload", file_name, bytes)
            .with_query("type", kind.as_str());
        let response = self.invoke_json(request).await?;

        response
            .get("media_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Media("upload response missing media_id".to_string()))
    }

    /// Download temporary media by id.
    pub async fn download_media(&self, media_id: &str) -> Result<Vec<u8>, GatewayError> {
        let request = ApiRequest::get("/media/get").with_query("media_id", media_id);
        match self.client.invoke(&self.scope, &request).await? {
            ApiPayload::Binary { bytes, .. } => Ok(bytes),
            ApiPayload::Json(_) => Err(GatewayError::Media(format!(
                "media {} returned JSON instead of content",
                media_id
            ))),
        }
    }

    /// Read a local media file (`~` and `file://` accepted).
    ///
    /// Returns the file name to upload under along with the contents.
    pub async fn read_local_media(
        &self,
        location: &str,
        file_name: Option<&str>,
    ) -> Result<(String, Vec<u8>), GatewayError> {
        let path = local_media_path(location);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GatewayError::Media(format!("Local file not found: {}", path.display()))
            } else {
                GatewayError::Media(format!("failed to read {}: {}", path.display(), e))
            }
        })?;

        let name = file_name
            .map(str::to_string)
            .or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "file".to_string());
        Ok((name, bytes))
    }

    /// Upload a local file and return its `media_id`.
    pub async fn upload_local_media(
        &self,
        kind: MediaKind,
        location: &str,
        file_name: Option<&str>,
    ) -> Result<String, GatewayError> {
        let (name, bytes) = self.read_local_media(location, file_name).await?;
        self.upload_media(kind, &name, bytes).await
    }

    /// Read a local file and send it as media.
    pub async fn send_media_path(
        &self,
        to: &str,
        location: &str,
        file_name: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let (name, bytes) = self.read_local_media(location, file_name).await?;
        self.send_media(to, &name, bytes).await
    }

    /// Upload `bytes` and send them as an image or, for anything else, a file.
    pub async fn send_media(
        &self,
        to: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<SendReceipt, GatewayError> {
        if detect_media_kind(file_name) == MediaKind::Image {
            let media_id = self.upload_media(MediaKind::Image, file_name, bytes).await?;
            self.send_image(to, &media_id).await
        } else {
            let media_id = self.upload_media(MediaKind::File, file_name, bytes).await?;
            self.send_file(to, &media_id).await
        }
    }

    /// Fetch a remote URL and send it as media.
    pub async fn send_media_url(
        &self,
        to: &str,
        url: &str,
        file_name: Option<&str>,
    ) -> Result<SendReceipt, GatewayError> {
        let response = self
            .client
            .http_client()
            .get(url)
            .send()
            .await
            .map_err(|e| GatewayError::Media(format!("failed to fetch {}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(GatewayError::Media(format!(
                "failed to fetch {}: status {}",
                url,
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Media(format!("failed to read {}: {}", url, e)))?;

        let name = file_name
            .map(str::to_string)
            .unwrap_or_else(|| file_name_from_url(url, "file"));
        self.send_media(to, &name, bytes.to_vec()).await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Value, GatewayError> {
        self.invoke_json(ApiRequest::get("/user/get").with_query("userid", user_id))
            .await
    }

    pub async fn list_department_users(
        &self,
        department_id: i64,
        fetch_child: bool,
    ) -> Result<Value, GatewayError> {
        let request = ApiRequest::get("/user/list")
            .with_query("department_id", department_id)
            .with_query("fetch_child", u8::from(fetch_child));
        self.invoke_json(request).await
    }

    /// Verify the credentials by fetching a token.
    pub async fn probe(&self) -> ProbeResult {
        let corp_id = Some(self.scope.corp_id.clone());
        let agent_id = Some(self.scope.agent_id.to_string());

        match self.client.tokens().get_token(&self.scope).await {
            Ok(_) => ProbeResult {
                ok: true,
                error: None,
                corp_id,
                agent_id,
            },
            Err(e) => ProbeResult {
                ok: false,
                error: Some(format!("connection failed: {}", e)),
                corp_id,
                agent_id,
            },
        }
    }
}

/// Reply surface for the dispatch pipeline.
#[derive(Clone)]
pub struct OutboundAdapter {
    messenger: Arc<Messenger>,
}

impl OutboundAdapter {
    pub fn new(messenger: Arc<Messenger>) -> Self {
        Self { messenger }
    }

    /// Send text, split into chunks the platform accepts.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt> {
        let mut receipt = None;
        for chunk in chunk_text(text, TEXT_CHUNK_LIMIT) {
            receipt = Some(
                self.messenger
                    .send_text(to, &chunk)
                    .await
                    .with_context(|| format!("Failed to send text to {}", to))?,
            );
        }
        receipt.context("Nothing was sent")
    }

    /// Send optional leading text, then the media at `media_url`.
    ///
    /// `media_url` is fetched over HTTP(S) or read from disk otherwise. A
    /// failed media send falls back to a text message carrying the link.
    pub async fn send_media(
        &self,
        to: &str,
        text: Option<&str>,
        media_url: Option<&str>,
    ) -> Result<SendReceipt> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());

        let text_receipt = match text {
            Some(text) => Some(self.send_text(to, text).await?),
            None => None,
        };

        let Some(url) = media_url else {
            return match text_receipt {
                Some(receipt) => Ok(receipt),
                None => self.send_text(to, "").await,
            };
        };

        let sent = if is_remote_url(url) {
            self.messenger.send_media_url(to, url, None).await
        } else {
            self.messenger.send_media_path(to, url, None).await
        };

        match sent {
            Ok(receipt) => {
                info!(to = %to, url = %url, "Media delivered");
                Ok(receipt)
            }
            Err(e) => {
                warn!(to = %to, url = %url, error = %e, "Media send failed, falling back to link");
                self.send_text(to, &format!("📎 {}", url)).await
            }
        }
    }
}
