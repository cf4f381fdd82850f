//! Identity assertion built from validated SSO attributes.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::sso::SsoAttributes;

/// How long an identity assertion stays valid, in hours.
pub const IDENTITY_LIFETIME_HOURS: i64 = 6;

/// The identity handed to the OAuth2 engine after a successful callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityAssertion {
    pub subject: String,
    pub email: String,
    /// The SSO provider only releases verified addresses.
    pub email_verified: bool,
    pub name: String,
    pub picture: String,
    pub external_id: String,
    pub groups: Vec<String>,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub auth_time: DateTime<Utc>,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `kid` of the key the engine signs tokens with.
    pub signing_key_id: String,
}

/// Map SSO attributes to an identity assertion.
#[must_use]
pub fn build_identity(
    issuer: &str,
    attributes: &SsoAttributes,
    signing_key_id: &str,
    now: DateTime<Utc>,
) -> IdentityAssertion {
    IdentityAssertion {
        subject: attributes.get_or_empty("username").to_owned(),
        email: attributes.get_or_empty("email").to_owned(),
        email_verified: true,
        name: attributes.get_or_empty("name").to_owned(),
        picture: attributes.get_or_empty("avatar_url").to_owned(),
        external_id: attributes.get_or_empty("external_id").to_owned(),
        groups: attributes.groups(),
        issuer: issuer.to_owned(),
        issued_at: now,
        auth_time: now,
        requested_at: now,
        expires_at: now + TimeDelta::hours(IDENTITY_LIFETIME_HOURS),
        signing_key_id: signing_key_id.to_owned(),
    }
}

impl IdentityAssertion {
    /// Claims exposed at the userinfo endpoint and in the ID token body.
    #[must_use]
    pub fn profile_claims(&self) -> serde_json::Value {
        serde_json::json!({
            "iss": self.issuer,
            "sub": self.subject,
            "email": self.email,
            "email_verified": self.email_verified,
            "name": self.name,
            "picture": self.picture,
            "groups": self.groups,
            "external_id": self.external_id,
            "iat": self.issued_at.timestamp(),
            "auth_time": self.auth_time.timestamp(),
        })
    }
}
