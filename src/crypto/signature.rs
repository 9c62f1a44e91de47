//! Callback signature: SHA-1 over the byte-wise sorted concatenation of
//! token, timestamp and nonce, rendered as lowercase hex.

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Computes the hex signature the platform attaches to a callback.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Returns `true` iff `signature` matches the expected signature.
///
/// Never fails; anything malformed is simply a mismatch. The comparison runs
/// in constant time over the digest length.
pub fn verify_signature(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    let expected = compute_signature(token, timestamp, nonce);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
