//! AES-256-CBC envelope used by the platform to encrypt callback payloads.
//!
//! Plaintext layout (before padding):
//!
//! ```text
//! [16 random bytes][u32 BE length L][L bytes message][receive id bytes]
//! ```
//!
//! Padding is PKCS-style to a 32-byte boundary, not the 16-byte AES block.
//! The IV is the first 16 raw bytes of the callback nonce.

use aes::Aes256;
use base64::{
    alphabet,
    engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64},
    Engine,
};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

use super::signature::{compute_signature, verify_signature};
use crate::error::{DecodeError, GatewayError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Size of the decoded AES key in bytes
const KEY_SIZE: usize = 32;

/// Size of the IV taken from the nonce
const IV_SIZE: usize = 16;

/// Random prefix in front of the length header
const RANDOM_PREFIX: usize = 16;

/// Length header size
const LENGTH_SIZE: usize = 4;

/// Padding alignment mandated by the platform
const PAD_BLOCK: usize = 32;

/// AES block size; ciphertext must be a multiple of this
const CIPHER_BLOCK: usize = 16;

/// Platform keys are 43 characters whose last symbol may carry stray bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Encrypted payload as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: String,
    /// Base64 ciphertext
    pub ciphertext: String,
    pub signature: String,
}

/// Plaintext recovered from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub message: String,
    /// Trailing identifier (corp id or bot id) appended by the sender
    pub receive_id: String,
}

/// Decodes the configured EncodingAESKey (43 chars, `=` stripped) into the
/// 32-byte AES key.
pub fn decode_key(encoding_aes_key: &str) -> Result<[u8; KEY_SIZE], DecodeError> {
    let padded = format!("{}=", encoding_aes_key.trim());
    let bytes = KEY_ENGINE
        .decode(padded)
        .map_err(|e| DecodeError::InvalidKey(e.to_string()))?;

    bytes.try_into().map_err(|bytes: Vec<u8>| {
        DecodeError::InvalidKey(format!("got {} bytes", bytes.len()))
    })
}

fn iv_from_nonce(nonce: &str) -> Result<&[u8], DecodeError> {
    nonce
        .as_bytes()
        .get(..IV_SIZE)
        .ok_or(DecodeError::InvalidNonce(nonce.len()))
}

/// Symmetric codec bound to one EncodingAESKey.
#[derive(Clone)]
pub struct EnvelopeCodec {
    key: [u8; KEY_SIZE],
    receive_id: String,
}

impl std::fmt::Debug for EnvelopeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeCodec")
            .field("key", &"<redacted>")
            .field("receive_id", &self.receive_id)
            .finish()
    }
}

impl EnvelopeCodec {
    /// Create a codec from the configured EncodingAESKey.
    pub fn new(encoding_aes_key: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            key: decode_key(encoding_aes_key)?,
            receive_id: String::new(),
        })
    }

    /// Set the receive id appended to messages this codec encrypts.
    pub fn with_receive_id(mut self, receive_id: impl Into<String>) -> Self {
        self.receive_id = receive_id.into();
        self
    }

    /// Decrypt a base64 ciphertext using the nonce bytes as IV.
    ///
    /// # Errors
    /// Any framing problem (base64, block alignment, padding byte, length
    /// header past the end of the buffer, non-UTF-8 message) is a
    /// [`DecodeError`]; nothing is read out of bounds.
    pub fn decrypt(&self, nonce: &str, ciphertext: &str) -> Result<DecodedMessage, DecodeError> {
        let iv = iv_from_nonce(nonce)?;
        let mut buf = BASE64
            .decode(ciphertext.trim())
            .map_err(|_| DecodeError::InvalidBase64)?;

        if buf.is_empty() || buf.len() % CIPHER_BLOCK != 0 {
            return Err(DecodeError::BlockAlignment(buf.len()));
        }

        let cipher = Aes256CbcDec::new_from_slices(&self.key, iv)
            .map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
        let plain = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| DecodeError::BlockAlignment(ciphertext.len()))?;

        let pad = plain[plain.len() - 1];
        if pad == 0 || usize::from(pad) > PAD_BLOCK || usize::from(pad) > plain.len() {
            return Err(DecodeError::InvalidPadding(pad));
        }
        let content = &plain[..plain.len() - usize::from(pad)];

        let header_end = RANDOM_PREFIX + LENGTH_SIZE;
        if content.len() < header_end {
            return Err(DecodeError::Truncated(content.len()));
        }
        let mut length = [0u8; LENGTH_SIZE];
        length.copy_from_slice(&content[RANDOM_PREFIX..header_end]);
        let declared = u32::from_be_bytes(length) as usize;

        let body = &content[header_end..];
        if declared > body.len() {
            return Err(DecodeError::LengthOutOfRange {
                declared,
                available: body.len(),
            });
        }
        let (message, receive_id) = body.split_at(declared);

        Ok(DecodedMessage {
            message: String::from_utf8(message.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?,
            receive_id: String::from_utf8_lossy(receive_id).into_owned(),
        })
    }

    /// Encrypt `message`; the inverse of [`EnvelopeCodec::decrypt`].
    pub fn encrypt(&self, nonce: &str, message: &str) -> Result<String, DecodeError> {
        let iv = iv_from_nonce(nonce)?;
        let message = message.as_bytes();
        let declared = u32::try_from(message.len())
            .map_err(|_| DecodeError::LengthOutOfRange {
                declared: message.len(),
                available: u32::MAX as usize,
            })?;

        let mut prefix = [0u8; RANDOM_PREFIX];
        rand::thread_rng().fill_bytes(&mut prefix);

        let content_len =
            RANDOM_PREFIX + LENGTH_SIZE + message.len() + self.receive_id.len();
        let pad = PAD_BLOCK - content_len % PAD_BLOCK;

        let mut buf = Vec::with_capacity(content_len + pad);
        buf.extend_from_slice(&prefix);
        buf.extend_from_slice(&declared.to_be_bytes());
        buf.extend_from_slice(message);
        buf.extend_from_slice(self.receive_id.as_bytes());
        // pad is in 1..=32, so it always fits in a byte
        buf.resize(content_len + pad, pad as u8);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, iv)
            .map_err(|e| DecodeError::InvalidKey(e.to_string()))?;
        let len = buf.len();
        let encrypted = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, len)
            .map_err(|_| DecodeError::BlockAlignment(len))?;

        Ok(BASE64.encode(encrypted))
    }

    /// Encrypt and sign a message into a wire envelope.
    pub fn seal(
        &self,
        token: &str,
        timestamp: &str,
        nonce: &str,
        message: &str,
    ) -> Result<Envelope, DecodeError> {
        Ok(Envelope {
            nonce: nonce.to_string(),
            ciphertext: self.encrypt(nonce, message)?,
            signature: compute_signature(token, timestamp, nonce),
        })
    }

    /// Verify an envelope's signature, then decrypt it.
    pub fn open(
        &self,
        token: &str,
        timestamp: &str,
        envelope: &Envelope,
    ) -> Result<DecodedMessage, GatewayError> {
        if !verify_signature(token, timestamp, &envelope.nonce, &envelope.signature) {
            return Err(GatewayError::Signature);
        }
        Ok(self.decrypt(&envelope.nonce, &envelope.ciphertext)?)
    }
}

/// Decrypt with a raw EncodingAESKey, returning just the message text.
pub fn decrypt(encoding_aes_key: &str, nonce: &str, ciphertext: &str) -> Result<String, DecodeError> {
    EnvelopeCodec::new(encoding_aes_key)?
        .decrypt(nonce, ciphertext)
        .map(|decoded| decoded.message)
}

/// Encrypt with a raw EncodingAESKey.
pub fn encrypt(encoding_aes_key: &str, nonce: &str, message: &str) -> Result<String, DecodeError> {
    EnvelopeCodec::new(encoding_aes_key)?.encrypt(nonce, message)
}
