//! Webhook callback endpoint.
//!
//! - `GET  <path>?msg_signature&timestamp&nonce&echostr` - URL verification
//! - `POST <path>` - event delivery (plain or `<Encrypt>`-wrapped XML)
//!
//! POST always answers `success` so the platform does not retry-flood us.
//! Events whose signature does not match, or that fail to decode, are logged
//! and dropped.

mod xml;


pub use xml::{element_inner, element_text};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CallbackSecrets;
use crate::crypto::{verify_signature, Envelope, EnvelopeCodec};
use crate::error::{DecodeError, GatewayError};

/// Acknowledgement body for POST callbacks
pub const ACK: &str = "success";

/// Plaintext event handed to the dispatch pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Event XML (decrypted if it arrived encrypted)
    pub body: String,
    pub decrypted: bool,
    /// Receive id recovered from the envelope
    pub receive_id: Option<String>,
}

/// Consumer of decoded events (routing, policy, agent dispatch).
#[async_trait]
pub trait EventDispatcher: Send + Sync {
    async fn dispatch(&self, event: InboundEvent) -> anyhow::Result<()>;
}

/// Shared state for the webhook router
#[derive(Clone)]
pub struct WebhookState {
    pub token: Option<String>,
    pub codec: Option<Arc<EnvelopeCodec>>,
    pub dispatcher: Arc<dyn EventDispatcher>,
}

impl WebhookState {
    /// Build state from callback secrets. An unusable AES key is an error here
    /// rather than on the first encrypted event.
    pub fn from_secrets(
        secrets: &CallbackSecrets,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Result<Self, GatewayError> {
        let codec = secrets
            .encoding_aes_key
            .as_deref()
            .map(EnvelopeCodec::new)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            token: secrets.token.clone(),
            codec,
            dispatcher,
        })
    }
}

/// Callback query parameters
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub msg_signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub echostr: Option<String>,
}

impl CallbackParams {
    fn signature_parts(&self) -> Option<(&str, &str, &str)> {
        Some((
            self.msg_signature.as_deref().filter(|s| !s.is_empty())?,
            self.timestamp.as_deref().filter(|s| !s.is_empty())?,
            self.nonce.as_deref().filter(|s| !s.is_empty())?,
        ))
    }
}

/// Create the webhook router mounted at `path`
pub fn create_webhook_router(path: &str, state: WebhookState) -> Router {
    Router::new()
        .route(path, get(verify_callback).post(receive_event))
        .with_state(Arc::new(state))
}

/// GET - callback URL verification
async fn verify_callback(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some((signature, timestamp, nonce)) = params.signature_parts() else {
        return (StatusCode::BAD_REQUEST, "Missing signature parameters").into_response();
    };

    let token = state.token.as_deref().unwrap_or("");
    if !verify_signature(token, timestamp, nonce, signature) {
        warn!("Invalid signature, rejecting callback verification");
        return (StatusCode::FORBIDDEN, "Invalid signature").into_response();
    }

    info!("Callback URL verified");
    params.echostr.unwrap_or_default().into_response()
}

/// POST - event delivery
async fn receive_event(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<CallbackParams>,
    body: Bytes,
) -> &'static str {
    let body = String::from_utf8_lossy(&body);

    match decode_inbound(&state, &params, &body) {
        Ok(Some(event)) => {
            debug!(decrypted = event.decrypted, "Dispatching inbound event");
            if let Err(e) = state.dispatcher.dispatch(event).await {
                warn!(error = %e, "Event dispatch failed");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Dropping inbound event"),
    }

    ACK
}

/// Verify and, if needed, decrypt a POST body.
///
/// A signature is checked only when a callback token is configured and the
/// event carries one: the `<Encrypt>` wrapper's `MsgSignature`/`TimeStamp`
/// first, the query parameters otherwise. Unsigned events are accepted.
///
/// Returns `Ok(None)` when the event is deliberately dropped (encrypted but
/// no AES key configured).
pub fn decode_inbound(
    state: &WebhookState,
    params: &CallbackParams,
    body: &str,
) -> Result<Option<InboundEvent>, GatewayError> {
    let Some(wrapper) = element_inner(body, "Encrypt") else {
        if let (Some(token), Some((signature, timestamp, nonce))) =
            (state.token.as_deref(), params.signature_parts())
        {
            if !verify_signature(token, timestamp, nonce, signature) {
                return Err(GatewayError::Signature);
            }
        }
        return Ok(Some(InboundEvent {
            body: body.to_string(),
            decrypted: false,
            receive_id: None,
        }));
    };

    let Some(codec) = state.codec.as_ref() else {
        warn!("Received encrypted event but no AES key is configured");
        return Ok(None);
    };

    // Either <Encrypt><Content/><Nonce/>...</Encrypt> or <Encrypt>ciphertext</Encrypt>
    let (ciphertext, nonce, signature, timestamp) = match element_text(wrapper, "Content") {
        Some(content) => (
            content,
            element_text(wrapper, "Nonce"),
            element_text(wrapper, "MsgSignature"),
            element_text(wrapper, "TimeStamp"),
        ),
        None => (
            element_text(body, "Encrypt").unwrap_or_default(),
            None,
            None,
            None,
        ),
    };
    let nonce = non_empty(nonce)
        .or(non_empty(params.nonce.as_deref()))
        .ok_or(DecodeError::InvalidNonce(0))?;
    let signature = non_empty(signature).or(non_empty(params.msg_signature.as_deref()));
    let timestamp = non_empty(timestamp).or(non_empty(params.timestamp.as_deref()));

    let decoded = match (state.token.as_deref(), signature) {
        (Some(token), Some(signature)) => {
            let timestamp = timestamp.ok_or(GatewayError::Signature)?;
            let envelope = Envelope {
                nonce: nonce.to_string(),
                ciphertext: ciphertext.to_string(),
                signature: signature.to_string(),
            };
            codec.open(token, timestamp, &envelope)?
        }
        _ => {
            debug!("Encrypted event carries no signature, decrypting unverified");
            codec.decrypt(nonce, ciphertext)?
        }
    };

    Ok(Some(InboundEvent {
        body: decoded.message,
        decrypted: true,
        receive_id: Some(decoded.receive_id).filter(|id| !id.is_empty()),
    }))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Dispatcher that only logs events; used when no pipeline is attached.
pub struct LoggingDispatcher;

#[async_trait]
impl EventDispatcher for LoggingDispatcher {
    async fn dispatch(&self, event: InboundEvent) -> anyhow::Result<()> {
        let msg_type = element_text(&event.body, "MsgType").unwrap_or("unknown");
        let from = element_text(&event.body, "FromUserName").unwrap_or("unknown");
        info!(
            msg_type = %msg_type,
            from = %from,
            decrypted = event.decrypted,
            "Inbound event received"
        );
        Ok(())
    }
}
