//! Callback security primitives.
//!
//! The platform signs every callback and can encrypt the payload. This module
//! verifies signatures and opens/seals the encrypted envelope.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Webhook request                    │
//! │  msg_signature, timestamp, nonce         │
//! └─────────────────────────────────────────┘
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       Signature                          │
//! │  - SHA-1 over sorted (token, ts, nonce)  │
//! │  - Constant-time compare                 │
//! └─────────────────────────────────────────┘
//!          ↓ (if <Encrypt> present)
//! ┌─────────────────────────────────────────┐
//! │       EnvelopeCodec                      │
//! │  - AES-256-CBC, IV = nonce bytes         │
//! │  - 32-byte PKCS-style padding            │
//! │  - [random16][len][msg][receive_id]      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wecom_gateway::crypto::{verify_signature, EnvelopeCodec};
//!
//! # fn main() -> anyhow::Result<()> {
//! let codec = EnvelopeCodec::new("jWmYm7qr5nMoAUwZRjGtBxmz3KA1tkAj3ykkR6q2B2C")?;
//! let ciphertext = codec.encrypt("1234567890123456", "hello")?;
//! let decoded = codec.decrypt("1234567890123456", &ciphertext)?;
//! assert_eq!(decoded.message, "hello");
//!
//! let ok = verify_signature("token", "1700000000", "nonce", "deadbeef");
//! assert!(!ok);
//! # Ok(())
//! # }
//! ```

mod envelope;
mod signature;

pub use envelope::{decode_key, decrypt, encrypt, DecodedMessage, Envelope, EnvelopeCodec};
pub use signature::{compute_signature, verify_signature};
