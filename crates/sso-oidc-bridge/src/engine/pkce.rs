//! PKCE for the authorization code grant (RFC 7636). Only `S256` is accepted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{EngineError, EngineResult};

/// The only supported challenge method.
pub const METHOD_S256: &str = "S256";

/// Length of an unpadded base64url SHA-256 digest.
const S256_CHALLENGE_LEN: usize = 43;

/// RFC 7636 §4.1: 43 to 128 characters from `[A-Za-z0-9-._~]`.
fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Check the PKCE parameters of an authorization request and return the
/// challenge to store with the code.
pub fn challenge_from_request(challenge: Option<String>, method: Option<&str>) -> EngineResult<Option<String>> {
    let Some(challenge) = challenge else {
        return Ok(None);
    };
    if method != Some(METHOD_S256) {
        return Err(EngineError::invalid_request("code_challenge_method must be 'S256'"));
    }
    let well_formed = challenge.len() == S256_CHALLENGE_LEN
        && challenge.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !well_formed {
        return Err(EngineError::invalid_request("malformed code_challenge"));
    }
    Ok(Some(challenge))
}

/// Check a verifier from the token request against the stored S256 challenge.
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    if !is_valid_verifier(code_verifier) {
        return false;
    }
    let computed = URL_SAFE_NO_PAD.encode(Sha256::digest(code_verifier.as_bytes()));
    computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
}
