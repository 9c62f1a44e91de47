//! Error taxonomy for the gateway.
//!
//! Inbound failures ([`GatewayError::Signature`], [`GatewayError::Decode`]) are
//! logged and swallowed at the webhook edge. Outbound failures (token, API,
//! transport) are returned to whoever asked for the call.

use thiserror::Error;

/// Top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Scope credentials missing or incomplete
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Webhook signature did not match
    #[error("signature verification failed")]
    Signature,

    /// Malformed envelope, padding, or length field
    #[error("envelope decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Access token could not be obtained
    #[error("access token unavailable: {0}")]
    Token(#[from] TokenError),

    /// Platform answered with a non-zero business error code
    #[error("{operation} failed: API error {code}: {message}")]
    Api {
        operation: String,
        code: i64,
        message: String,
    },

    /// Network failure that exhausted the retry budget
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Transport {
        operation: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// Media could not be prepared for upload
    #[error("media error: {0}")]
    Media(String),

    /// Blank or unusable message recipient
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),
}

impl GatewayError {
    /// Business error code, if the platform returned one.
    pub fn api_code(&self) -> Option<i64> {
        match self {
            GatewayError::Api { code, .. } => Some(*code),
            GatewayError::Token(TokenError::Rejected { code, .. }) => Some(*code),
            _ => None,
        }
    }
}

/// Envelope decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("encoding AES key must decode to 32 bytes: {0}")]
    InvalidKey(String),

    #[error("nonce must be at least 16 bytes, got {0}")]
    InvalidNonce(usize),

    #[error("ciphertext is not valid base64")]
    InvalidBase64,

    #[error("ciphertext length {0} is not a non-zero multiple of the cipher block")]
    BlockAlignment(usize),

    #[error("invalid padding byte {0}")]
    InvalidPadding(u8),

    #[error("plaintext too short ({0} bytes) to hold the length header")]
    Truncated(usize),

    #[error("declared message length {declared} exceeds remaining {available} bytes")]
    LengthOutOfRange { declared: usize, available: usize },

    #[error("message is not valid UTF-8")]
    InvalidUtf8,
}

/// Token refresh errors.
///
/// `Clone` so a single failed refresh can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token endpoint rejected credentials: {message} ({code})")]
    Rejected { code: i64, message: String },

    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token response malformed: {0}")]
    Malformed(String),

    #[error("token refresh aborted: {0}")]
    Aborted(String),
}
