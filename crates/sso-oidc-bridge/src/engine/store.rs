//! In-memory authorization code and token store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::claims::IdentityAssertion;

/// Auth code lifetime: 10 minutes.
pub const AUTH_CODE_LIFETIME: u64 = 600;
/// Access token lifetime: 30 minutes.
pub const ACCESS_TOKEN_LIFETIME: u64 = 1800;
/// Refresh token lifetime: 30 days.
pub const REFRESH_TOKEN_LIFETIME: u64 = 30 * 24 * 3600;
/// Cleanup interval: 5 minutes.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Everything an authorization code stands for.
#[derive(Debug, Clone)]
pub struct AuthCodeGrant {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub scopes: Vec<String>,
    /// OIDC `nonce` from the authorization request, echoed in the ID token.
    pub nonce: Option<String>,
    pub identity: IdentityAssertion,
}

/// What a valid access token grants.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub client_id: String,
    pub scopes: Vec<String>,
    pub identity: IdentityAssertion,
}

struct AuthCode {
    grant: AuthCodeGrant,
    created_at: Instant,
}

struct AccessToken {
    grant: AccessGrant,
    created_at: Instant,
    expires_in: u64,
}

struct RefreshToken {
    access_token: String,
    grant: AccessGrant,
    created_at: Instant,
    expires_in: u64,
}

impl AuthCode {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_secs() >= AUTH_CODE_LIFETIME
    }
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_secs() >= self.expires_in
    }
}

impl RefreshToken {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed().as_secs() >= self.expires_in
    }
}

/// A token pair returned from token creation/refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub grant: AccessGrant,
}

/// Which kind of token a lookup matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    /// Name used for `token_type_hint` and in introspection responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Refresh => "refresh_token",
        }
    }
}

/// A live token found by [`TokenStore::lookup`].
#[derive(Debug, Clone)]
pub struct ActiveToken {
    pub kind: TokenKind,
    pub grant: AccessGrant,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Wall-clock issue and expiry times of a token created at `created_at`.
fn wall_clock_bounds(created_at: Instant, lifetime: u64) -> (DateTime<Utc>, DateTime<Utc>) {
    let age = TimeDelta::from_std(created_at.elapsed()).unwrap_or(TimeDelta::zero());
    let issued_at = Utc::now() - age;
    let lifetime = TimeDelta::from_std(Duration::from_secs(lifetime)).unwrap_or(TimeDelta::MAX);
    (issued_at, issued_at.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC))
}

/// In-memory OAuth state store.
#[derive(Clone)]
pub struct TokenStore {
    auth_codes: Arc<RwLock<HashMap<String, AuthCode>>>,
    access_tokens: Arc<RwLock<HashMap<String, AccessToken>>>,
    refresh_tokens: Arc<RwLock<HashMap<String, RefreshToken>>>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            auth_codes: Arc::new(RwLock::new(HashMap::new())),
            access_tokens: Arc::new(RwLock::new(HashMap::new())),
            refresh_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate a random token using two UUIDs.
    fn generate_token() -> String {
        format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
    }

    /// Create an authorization code for a completed authorization.
    pub async fn create_auth_code(&self, grant: AuthCodeGrant) -> String {
        let code = Self::generate_token();
        self.auth_codes
            .write()
            .await
            .insert(code.clone(), AuthCode { grant, created_at: Instant::now() });
        code
    }

    /// Consume an authorization code (one-time use).
    ///
    /// Returns the grant if the code exists and has not expired.
    pub async fn consume_auth_code(&self, code: &str) -> Option<AuthCodeGrant> {
        let auth_code = self.auth_codes.write().await.remove(code)?;
        if auth_code.is_expired() {
            return None;
        }
        Some(auth_code.grant)
    }

    /// Create an access + refresh token pair.
    pub async fn create_token_pair(&self, grant: AccessGrant) -> TokenPair {
        let access = Self::generate_token();
        let refresh = Self::generate_token();

        self.access_tokens.write().await.insert(
            access.clone(),
            AccessToken {
                grant: grant.clone(),
                created_at: Instant::now(),
                expires_in: ACCESS_TOKEN_LIFETIME,
            },
        );

        self.refresh_tokens.write().await.insert(
            refresh.clone(),
            RefreshToken {
                access_token: access.clone(),
                grant: grant.clone(),
                created_at: Instant::now(),
                expires_in: REFRESH_TOKEN_LIFETIME,
            },
        );

        TokenPair {
            access_token: access,
            refresh_token: refresh,
            expires_in: ACCESS_TOKEN_LIFETIME,
            grant,
        }
    }

    /// Validate an access token. Returns its grant if valid.
    pub async fn validate_access_token(&self, token: &str) -> Option<AccessGrant> {
        let tokens = self.access_tokens.read().await;
        let access = tokens.get(token)?;
        if access.is_expired() {
            return None;
        }
        Some(access.grant.clone())
    }

    /// Refresh a token pair: invalidate old tokens and issue new ones.
    ///
    /// The refresh token is burned even when presented by the wrong client.
    pub async fn refresh_token_pair(&self, refresh_token: &str, client_id: &str) -> Option<TokenPair> {
        let old = self.refresh_tokens.write().await.remove(refresh_token)?;

        if old.is_expired() || old.grant.client_id != client_id {
            return None;
        }

        self.access_tokens.write().await.remove(&old.access_token);

        Some(self.create_token_pair(old.grant).await)
    }

    /// Find a live access or refresh token.
    pub async fn lookup(&self, token: &str) -> Option<ActiveToken> {
        {
            let tokens = self.access_tokens.read().await;
            if let Some(access) = tokens.get(token).filter(|t| !t.is_expired()) {
                let (issued_at, expires_at) = wall_clock_bounds(access.created_at, access.expires_in);
                return Some(ActiveToken { kind: TokenKind::Access, grant: access.grant.clone(), issued_at, expires_at });
            }
        }

        let tokens = self.refresh_tokens.read().await;
        let refresh = tokens.get(token).filter(|t| !t.is_expired())?;
        let (issued_at, expires_at) = wall_clock_bounds(refresh.created_at, refresh.expires_in);
        Some(ActiveToken { kind: TokenKind::Refresh, grant: refresh.grant.clone(), issued_at, expires_at })
    }

    /// Revoke a token issued to `client_id`.
    ///
    /// Revoking a refresh token also revokes the access token issued with it.
    /// Tokens of other clients are left alone. Returns whether anything was removed.
    pub async fn revoke(&self, token: &str, client_id: &str) -> bool {
        {
            let mut tokens = self.access_tokens.write().await;
            if tokens.get(token).is_some_and(|t| t.grant.client_id == client_id) {
                tokens.remove(token);
                return true;
            }
        }

        let revoked = {
            let mut tokens = self.refresh_tokens.write().await;
            match tokens.get(token) {
                Some(t) if t.grant.client_id == client_id => tokens.remove(token),
                _ => None,
            }
        };
        let Some(revoked) = revoked else {
            return false;
        };
        self.access_tokens.write().await.remove(&revoked.access_token);
        true
    }

    /// Start background cleanup task for expired tokens and codes.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                self.cleanup_expired().await;
            }
        });
    }

    async fn cleanup_expired(&self) {
        self.auth_codes.write().await.retain(|_, code| !code.is_expired());

        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired access tokens");
            }
        }

        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| !token.is_expired());
            let removed = before - tokens.len();
            if removed > 0 {
                tracing::debug!(count = removed, "Cleaned up expired refresh tokens");
            }
        }
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish()
    }
}
