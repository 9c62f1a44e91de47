// Error taxonomy
pub mod error;

// Configuration and credential scopes
pub mod config;

// Callback signatures and envelope encryption
pub mod crypto;

// Access token cache with single-flight refresh
pub mod token;

// Resilient platform API invoker
pub mod client;

// Message send, media, and directory operations
pub mod outbound;

// Webhook callback endpoint
pub mod webhook;

pub use client::{ApiClient, RetryPolicy};
pub use config::{CredentialScope, GatewayConfig};
pub use crypto::EnvelopeCodec;
pub use error::{DecodeError, GatewayError, TokenError};
pub use token::TokenStore;
