//! RSA key used to sign ID tokens.

use anyhow::Context;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Modulus size for generated keys.
pub const KEY_BITS: usize = 2048;

/// Length of the key fingerprint used as `kid`.
const KEY_ID_LEN: usize = 32;

/// The service's ID token signing key.
pub struct SigningKey {
    public_key: RsaPublicKey,
    encoding_key: EncodingKey,
    key_id: String,
}

impl SigningKey {
    /// Generate a fresh key. Tokens signed with it become unverifiable on restart.
    pub fn generate() -> anyhow::Result<Self> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS).context("generating RSA key")?;
        Self::from_private_key(&private_key)
    }

    /// Load a PKCS#1 (`RSA PRIVATE KEY`) PEM.
    pub fn from_pkcs1_pem(pem: &str) -> anyhow::Result<Self> {
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem).context("parsing private key")?;
        Self::from_private_key(&private_key)
    }

    fn from_private_key(private_key: &RsaPrivateKey) -> anyhow::Result<Self> {
        let der = private_key.to_pkcs1_der().context("encoding private key")?;
        let public_key = RsaPublicKey::from(private_key);
        let key_id = key_id(&public_key)?;

        Ok(Self {
            encoding_key: EncodingKey::from_rsa_der(der.as_bytes()),
            public_key,
            key_id,
        })
    }

    /// Fingerprint of the public key, published as `kid`.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The public half as a JWK.
    #[must_use]
    pub fn jwk(&self) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "alg": "RS256",
            "use": "sig",
            "kid": self.key_id,
            "n": URL_SAFE_NO_PAD.encode(self.public_key.n().to_bytes_be()),
            "e": URL_SAFE_NO_PAD.encode(self.public_key.e().to_bytes_be()),
        })
    }

    /// JWKS document containing this key.
    #[must_use]
    pub fn jwks(&self) -> serde_json::Value {
        serde_json::json!({ "keys": [self.jwk()] })
    }

    /// Sign `claims` as an RS256 JWT with `kid` = `key_id`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, jsonwebtoken::errors::Error> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_id.clone());
        jsonwebtoken::encode(&header, claims, &self.encoding_key)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey").field("key_id", &self.key_id).finish()
    }
}

/// Deterministic fingerprint of a public key.
///
/// Standard base64 of SHA-256 over the PKCS#1 DER encoding, truncated to 32 characters.
pub fn key_id(public_key: &RsaPublicKey) -> anyhow::Result<String> {
    let der = public_key.to_pkcs1_der().context("encoding public key")?;
    let mut id = STANDARD.encode(Sha256::digest(der.as_bytes()));
    id.truncate(KEY_ID_LEN);
    Ok(id)
}

/// Generate a new key and return it as a PKCS#1 PEM.
pub fn generate_pem() -> anyhow::Result<String> {
    let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS).context("generating RSA key")?;
    let pem = private_key.to_pkcs1_pem(LineEnding::LF).context("encoding private key")?;
    Ok(pem.to_string())
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation};
    use serde::Deserialize;

    use super::*;

    const TEST_KEY: &str = include_str!("../tests/fixtures/test_key.pem");

    #[derive(Debug, Serialize, Deserialize)]
    struct Claims {
        sub: String,
        exp: i64,
    }

    #[test]
    fn test_key_id_is_stable() {
        let a = SigningKey::from_pkcs1_pem(TEST_KEY).unwrap();
        let b = SigningKey::from_pkcs1_pem(TEST_KEY).unwrap();
        assert_eq!(a.key_id(), b.key_id());
        assert_eq!(a.key_id().len(), 32);
    }

    #[test]
    fn test_invalid_pem_rejected() {
        assert!(SigningKey::from_pkcs1_pem("not a key").is_err());
    }

    #[test]
    fn test_jwk_fields() {
        let key = SigningKey::from_pkcs1_pem(TEST_KEY).unwrap();
        let jwk = key.jwk();
        assert_eq!(jwk["kty"], "RSA");
        assert_eq!(jwk["alg"], "RS256");
        assert_eq!(jwk["kid"], key.key_id());
        assert_eq!(jwk["e"], "AQAB");
        assert_eq!(key.jwks()["keys"][0], jwk);
    }

    #[test]
    fn test_signed_token_verifies_against_jwk() {
        let key = SigningKey::from_pkcs1_pem(TEST_KEY).unwrap();
        let claims = Claims { sub: "alice".into(), exp: chrono::Utc::now().timestamp() + 600 };
        let token = key.sign(&claims).unwrap();

        let header = jsonwebtoken::decode_header(&token).unwrap();
        assert_eq!(header.kid.as_deref(), Some(key.key_id()));

        let jwk = key.jwk();
        let decoding =
            DecodingKey::from_rsa_components(jwk["n"].as_str().unwrap(), jwk["e"].as_str().unwrap())
                .unwrap();
        let decoded =
            jsonwebtoken::decode::<Claims>(&token, &decoding, &Validation::new(Algorithm::RS256))
                .unwrap();
        assert_eq!(decoded.claims.sub, "alice");
    }
}
