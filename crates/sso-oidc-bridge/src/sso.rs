//! DiscourseConnect-style SSO payload codec.
//!
//! Outbound: `nonce=<n>&return_sso_url=<url>` is base64-encoded and signed with
//! HMAC-SHA256 over the base64 text. Inbound: the signature is checked in
//! constant time before anything is decoded.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{BridgeError, BridgeResult};

type HmacSha256 = Hmac<Sha256>;

/// Path of the SSO endpoint on the provider.
pub const PROVIDER_PATH: &str = "/session/sso_provider";

/// Build the URL that sends the user agent to the SSO provider.
///
/// The callback URL is placed into the payload verbatim. The query values of
/// the returned URL are form-escaped; once decoded, `sso` is exactly the text
/// the signature covers.
pub fn build_handshake_url(
    provider_base: &str,
    callback_url: &str,
    secret: &str,
    nonce: u64,
) -> BridgeResult<String> {
    let payload = format!("nonce={nonce}&return_sso_url={callback_url}");
    let (sso, sig) = encode_signed_payload(&payload, secret)?;

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("sso", &sso)
        .append_pair("sig", &sig)
        .finish();

    Ok(format!("{}{PROVIDER_PATH}?{query}", provider_base.trim_end_matches('/')))
}

/// Base64-encode a form-encoded payload and sign the encoded text.
///
/// Returns `(sso, sig)` with `sig` hex-encoded.
pub fn encode_signed_payload(payload: &str, secret: &str) -> BridgeResult<(String, String)> {
    let sso = STANDARD.encode(payload);
    let sig = hex::encode(compute_mac(secret, sso.as_bytes())?);
    Ok((sso, sig))
}

/// Validate a callback from the SSO provider and return its attributes.
///
/// Signature first: a mismatch (including a `sig` that is not valid hex) stops
/// processing before the payload is decoded. The nonce is checked last, so a
/// validly signed but stale payload is reported as [`BridgeError::NonceReplay`].
pub fn validate_callback(
    sso: &str,
    sig: &str,
    secret: &str,
    expected_nonce: u64,
) -> BridgeResult<SsoAttributes> {
    let computed = compute_mac(secret, sso.as_bytes())?;
    let Ok(provided) = hex::decode(sig) else {
        return Err(BridgeError::SignatureMismatch);
    };
    if !bool::from(computed.as_slice().ct_eq(provided.as_slice())) {
        return Err(BridgeError::SignatureMismatch);
    }

    let decoded = STANDARD
        .decode(sso)
        .map_err(|e| BridgeError::malformed(format!("decoding payload: {e}")))?;
    let attributes = SsoAttributes::parse(&decoded);

    let nonce = attributes
        .get("nonce")
        .ok_or_else(|| BridgeError::malformed("payload has no nonce"))?
        .parse::<u64>()
        .map_err(|e| BridgeError::malformed(format!("parsing returned nonce: {e}")))?;

    if nonce != expected_nonce {
        return Err(BridgeError::NonceReplay);
    }

    Ok(attributes)
}

fn compute_mac(secret: &str, data: &[u8]) -> BridgeResult<Vec<u8>> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| BridgeError::InvalidSecret(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Multi-valued attributes decoded from a validated SSO payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SsoAttributes {
    values: HashMap<String, Vec<String>>,
}

impl SsoAttributes {
    /// Parse form-encoded bytes, keeping every value of repeated keys.
    #[must_use]
    pub fn parse(form: &[u8]) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(form) {
            values.entry(key.into_owned()).or_default().push(value.into_owned());
        }
        Self { values }
    }

    /// Single value lookup. When a key repeats, the last occurrence wins.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.last()).map(String::as_str)
    }

    /// Lookup defaulting to an empty string.
    #[must_use]
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or_default()
    }

    /// Every value recorded for `key`, in payload order.
    #[must_use]
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map_or(&[], Vec::as_slice)
    }

    /// The comma-joined `groups` attribute split into names. Empty segments are dropped.
    #[must_use]
    pub fn groups(&self) -> Vec<String> {
        self.get_or_empty("groups")
            .split(',')
            .filter(|g| !g.is_empty())
            .map(str::to_owned)
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
