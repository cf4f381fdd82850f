//! Configuration for the SSO bridge.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::policy::GroupPolicy;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Path under which the OAuth2 endpoints are mounted.
    pub const BASE_PATH: &str = "/oauth2";

    /// Listen address.
    pub const LISTEN_ADDR: &str = "127.0.0.1:8080";

    /// Name of the correlation cookie.
    pub const SESSION_COOKIE: &str = "oidc_session";

    /// Pending authorization lifetime (10 minutes).
    pub const PENDING_TTL: Duration = Duration::from_secs(600);

    /// Cap on concurrently pending authorizations.
    pub const MAX_PENDING: usize = 10_000;

    /// How often expired pending authorizations are swept.
    pub const REAP_INTERVAL: Duration = Duration::from_secs(60);
}

/// One registered OAuth2 client.
#[derive(Clone, Deserialize)]
pub struct ClientConfig {
    /// Client secret, plain or bcrypt-hashed. Clients without one must use PKCE.
    #[serde(default)]
    pub secret: Option<String>,

    pub redirect_uris: Vec<String>,

    /// Group restriction. Absent means unrestricted.
    #[serde(default)]
    pub group_policy: Option<GroupPolicy>,
}

impl ClientConfig {
    #[must_use]
    pub fn new(secret: Option<String>, redirect_uris: Vec<String>) -> Self {
        Self { secret, redirect_uris, group_policy: None }
    }

    #[must_use]
    pub fn with_group_policy(mut self, policy: GroupPolicy) -> Self {
        self.group_policy = Some(policy);
        self
    }

    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.secret.is_none()
    }

    /// Check a presented secret.
    ///
    /// A stored bcrypt hash (`$2a$`, `$2b$`, `$2y$`) is verified with bcrypt;
    /// anything else is compared in constant time. Public clients accept any value.
    #[must_use]
    pub fn verify_secret(&self, provided: &str) -> bool {
        match self.secret.as_deref() {
            None => true,
            Some(hash) if is_bcrypt_hash(hash) => pwhash::bcrypt::verify(provided, hash),
            Some(expected) => bool::from(expected.as_bytes().ct_eq(provided.as_bytes())),
        }
    }
}

fn is_bcrypt_hash(secret: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|prefix| secret.starts_with(prefix))
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("public", &self.is_public())
            .field("redirect_uris", &self.redirect_uris)
            .field("group_policy", &self.group_policy)
            .finish()
    }
}

/// Registered clients keyed by client id.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, ClientConfig>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of `client_id -> ClientConfig`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let clients: HashMap<String, ClientConfig> =
            serde_json::from_str(json).context("failed to parse clients")?;
        for (id, client) in &clients {
            anyhow::ensure!(!client.redirect_uris.is_empty(), "client {id} has no redirect_uris");
        }
        Ok(Self { clients })
    }

    /// Load clients from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading clients file {}", path.display()))?;
        Self::from_json(&raw)
    }

    #[must_use]
    pub fn with_client(mut self, id: impl Into<String>, client: ClientConfig) -> Self {
        self.clients.insert(id.into(), client);
        self
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ClientConfig> {
        self.clients.get(id)
    }

    /// The group policy of a client, if it has one.
    #[must_use]
    pub fn group_policy(&self, id: &str) -> Option<&GroupPolicy> {
        self.get(id).and_then(|c| c.group_policy.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the SSO provider, e.g. `https://forum.example.com`.
    pub sso_server: String,

    /// Secret shared with the SSO provider.
    pub sso_secret: String,

    /// Path the OAuth2 endpoints are mounted under.
    pub base_path: String,

    /// Address to listen on.
    pub listen_addr: String,

    /// Pending authorization lifetime.
    pub pending_ttl: Duration,

    /// Cap on concurrently pending authorizations.
    pub max_pending: usize,

    /// Reaper interval.
    pub reap_interval: Duration,
}

impl Config {
    #[must_use]
    pub fn new(sso_server: impl Into<String>, sso_secret: impl Into<String>) -> Self {
        Self {
            sso_server: sso_server.into(),
            sso_secret: sso_secret.into(),
            base_path: defaults::BASE_PATH.to_string(),
            listen_addr: defaults::LISTEN_ADDR.to_string(),
            pending_ttl: defaults::PENDING_TTL,
            max_pending: defaults::MAX_PENDING,
            reap_interval: defaults::REAP_INTERVAL,
        }
    }

    /// Create a test configuration pointing at a fake SSO provider.
    #[must_use]
    pub fn for_testing(sso_server: &str) -> Self {
        Self::new(sso_server, "test-sso-secret")
    }

    /// Set the mount path. Normalized to a leading `/` and no trailing `/`.
    #[must_use]
    pub fn with_base_path(mut self, base_path: &str) -> Self {
        self.base_path = normalize_base_path(base_path);
        self
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("sso_server", &self.sso_server)
            .field("base_path", &self.base_path)
            .field("listen_addr", &self.listen_addr)
            .field("pending_ttl", &self.pending_ttl)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() { String::new() } else { format!("/{trimmed}") }
}
