//! Random values, PKCE and comparisons for the authorization request, using `ring`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use super::error::AuthError;

/// Bytes of entropy behind `state`, `nonce` and the PKCE verifier (256 bits).
pub const RANDOM_VALUE_BYTES: usize = 32;

/// Random value encoded as unpadded base64url.
pub fn random_url_safe(len_bytes: usize) -> Result<String, AuthError> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len_bytes];
    rng.fill(&mut buf)
        .map_err(|_| AuthError::Internal("system random source failed".into()))?;
    Ok(URL_SAFE_NO_PAD.encode(&buf))
}

/// Fresh PKCE code verifier: 43 characters from the unreserved alphabet.
pub fn pkce_code_verifier() -> Result<String, AuthError> {
    random_url_safe(RANDOM_VALUE_BYTES)
}

/// Generate a PKCE code challenge from the given verifier using SHA-256 and base64url (no padding).
pub fn pkce_code_challenge(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}

/// RFC 7636 §4.1: 43 to 128 characters of `[A-Za-z0-9-._~]`.
pub fn is_valid_pkce_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
