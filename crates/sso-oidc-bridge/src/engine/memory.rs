//! In-process OAuth2/OIDC provider.
//!
//! Implements the authorization code grant (RFC 6749) with PKCE (RFC 7636),
//! refresh token rotation, RS256 ID tokens, token introspection (RFC 7662)
//! and revocation (RFC 7009). All state lives in a
//! [`TokenStore`]; nothing survives a restart.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::Query;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pkce;
use super::store::{AccessGrant, AuthCodeGrant, TokenPair, TokenStore};
use super::AuthorizationEngine;
use crate::claims::IdentityAssertion;
use crate::config::{ClientConfig, ClientRegistry};
use crate::error::{BridgeError, EngineError, EngineResult};
use crate::keys::SigningKey;

/// Scope that makes the token endpoint return an ID token.
pub const SCOPE_OPENID: &str = "openid";

/// Query parameters of `GET <base>/auth`.
#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// A validated authorization request waiting for the user to authenticate.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub state: Option<String>,
    pub requested_scopes: Vec<String>,
    pub granted_scopes: Vec<String>,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
}

/// Client id and secret from `client_secret_basic` or `client_secret_post`.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials").field("client_id", &self.client_id).finish()
    }
}

/// Form body of `POST <base>/token`.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl TokenRequest {
    /// Credentials sent in the body (`client_secret_post`, or a bare id for public clients).
    #[must_use]
    pub fn credentials(&self) -> Option<ClientCredentials> {
        body_credentials(self.client_id.as_ref(), self.client_secret.as_ref())
    }
}

/// Form body of `POST <base>/introspect` and `POST <base>/revoke`.
///
/// `token_type_hint` is accepted and ignored; both token kinds are searched.
#[derive(Debug, Deserialize)]
pub struct TokenLookupRequest {
    pub token: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl TokenLookupRequest {
    #[must_use]
    pub fn credentials(&self) -> Option<ClientCredentials> {
        body_credentials(self.client_id.as_ref(), self.client_secret.as_ref())
    }
}

fn body_credentials(client_id: Option<&String>, client_secret: Option<&String>) -> Option<ClientCredentials> {
    client_id.map(|client_id| ClientCredentials { client_id: client_id.clone(), client_secret: client_secret.cloned() })
}

/// Introspection response (RFC 7662 §2.2). Inactive tokens only carry `active`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Successful token endpoint response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub refresh_token: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Body of a signed ID token.
#[derive(Debug, Serialize)]
struct IdTokenClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
    email: &'a str,
    email_verified: bool,
    name: &'a str,
    picture: &'a str,
    groups: &'a [String],
    external_id: &'a str,
}

/// OAuth2/OIDC engine backed by process memory.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    clients: Arc<ClientRegistry>,
    keys: Arc<SigningKey>,
    store: Arc<TokenStore>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new(clients: Arc<ClientRegistry>, keys: SigningKey) -> Self {
        Self { clients, keys: Arc::new(keys), store: Arc::new(TokenStore::new()) }
    }

    /// Start the background sweep of expired codes and tokens.
    pub fn start_cleanup_task(&self) {
        Arc::clone(&self.store).start_cleanup_task();
    }

    /// JWKS document for `<base>/certs`.
    #[must_use]
    pub fn jwks(&self) -> serde_json::Value {
        self.keys.jwks()
    }

    /// OpenID Provider metadata for `issuer`.
    #[must_use]
    pub fn discovery(&self, issuer: &str) -> serde_json::Value {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/auth"),
            "token_endpoint": format!("{issuer}/token"),
            "userinfo_endpoint": format!("{issuer}/userinfo"),
            "jwks_uri": format!("{issuer}/certs"),
            "introspection_endpoint": format!("{issuer}/introspect"),
            "revocation_endpoint": format!("{issuer}/revoke"),
            "scopes_supported": [SCOPE_OPENID],
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"],
            "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
            "code_challenge_methods_supported": [pkce::METHOD_S256],
            "claims_supported": [
                "iss", "sub", "aud", "exp", "iat", "auth_time", "nonce",
                "email", "email_verified", "name", "picture", "groups", "external_id"
            ]
        })
    }

    /// Check client credentials against the registry.
    ///
    /// Confidential clients must present their secret; public clients are
    /// identified by id alone and rely on PKCE.
    pub fn authenticate_client(&self, credentials: &ClientCredentials) -> EngineResult<&ClientConfig> {
        let client = self.clients.get(&credentials.client_id).ok_or(EngineError::InvalidClient)?;

        if !client.verify_secret(credentials.client_secret.as_deref().unwrap_or_default()) {
            tracing::warn!(client_id = %credentials.client_id, "Client authentication failed");
            return Err(EngineError::InvalidClient);
        }
        Ok(client)
    }

    /// Pick the caller's credentials and authenticate them.
    ///
    /// `basic` carries `client_secret_basic` credentials and takes precedence
    /// over any in the form body.
    fn authenticate_caller(
        &self,
        basic: Option<ClientCredentials>,
        body: Option<ClientCredentials>,
    ) -> EngineResult<ClientCredentials> {
        let credentials =
            basic.or(body).ok_or_else(|| EngineError::invalid_request("missing client credentials"))?;
        self.authenticate_client(&credentials)?;
        Ok(credentials)
    }

    /// Handle a token endpoint request.
    pub async fn token(
        &self,
        form: &TokenRequest,
        basic: Option<ClientCredentials>,
    ) -> EngineResult<TokenResponse> {
        let credentials = self.authenticate_caller(basic, form.credentials())?;

        match form.grant_type.as_str() {
            "authorization_code" => self.exchange_code(&credentials.client_id, form).await,
            "refresh_token" => self.refresh(&credentials.client_id, form).await,
            other => Err(EngineError::UnsupportedGrantType(other.to_owned())),
        }
    }

    async fn exchange_code(&self, client_id: &str, form: &TokenRequest) -> EngineResult<TokenResponse> {
        let code = form.code.as_deref().ok_or_else(|| EngineError::invalid_request("missing code"))?;

        // Consume the auth code (one-time)
        let grant = self
            .store
            .consume_auth_code(code)
            .await
            .ok_or_else(|| EngineError::invalid_grant("invalid or expired authorization code"))?;

        if grant.client_id != client_id {
            return Err(EngineError::invalid_grant("code was issued to another client"));
        }
        if form.redirect_uri.as_deref().is_some_and(|uri| uri != grant.redirect_uri) {
            return Err(EngineError::invalid_grant("redirect_uri mismatch"));
        }

        if let Some(challenge) = grant.code_challenge.as_deref() {
            let verifier = form
                .code_verifier
                .as_deref()
                .ok_or_else(|| EngineError::invalid_request("missing code_verifier"))?;
            if !pkce::verify_s256(verifier, challenge) {
                return Err(EngineError::invalid_grant("PKCE verification failed"));
            }
        }

        let pair = self
            .store
            .create_token_pair(AccessGrant {
                client_id: grant.client_id,
                scopes: grant.scopes,
                identity: grant.identity,
            })
            .await;

        tracing::info!(client_id = %client_id, subject = %pair.grant.identity.subject, "Issued token pair");
        let id_token_expiry = pair.grant.identity.expires_at;
        self.token_response(pair, grant.nonce.as_deref(), id_token_expiry)
    }

    async fn refresh(&self, client_id: &str, form: &TokenRequest) -> EngineResult<TokenResponse> {
        let refresh_token = form
            .refresh_token
            .as_deref()
            .ok_or_else(|| EngineError::invalid_request("missing refresh_token"))?;

        let pair = self
            .store
            .refresh_token_pair(refresh_token, client_id)
            .await
            .ok_or_else(|| EngineError::invalid_grant("invalid or expired refresh token"))?;

        // A refreshed ID token gets the login's lifetime again, counted from now.
        let identity = &pair.grant.identity;
        let id_token_expiry = Utc::now()
            .checked_add_signed(identity.expires_at - identity.issued_at)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        tracing::info!(client_id = %client_id, "Refreshed token pair");
        self.token_response(pair, None, id_token_expiry)
    }

    fn token_response(
        &self,
        pair: TokenPair,
        nonce: Option<&str>,
        id_token_expiry: DateTime<Utc>,
    ) -> EngineResult<TokenResponse> {
        let id_token = if pair.grant.scopes.iter().any(|s| s == SCOPE_OPENID) {
            Some(self.sign_id_token(&pair.grant, nonce, id_token_expiry)?)
        } else {
            None
        };

        Ok(TokenResponse {
            access_token: pair.access_token,
            token_type: "Bearer",
            expires_in: pair.expires_in,
            refresh_token: pair.refresh_token,
            scope: pair.grant.scopes.join(" "),
            id_token,
        })
    }

    fn sign_id_token(
        &self,
        grant: &AccessGrant,
        nonce: Option<&str>,
        expires_at: DateTime<Utc>,
    ) -> EngineResult<String> {
        let identity = &grant.identity;
        let claims = IdTokenClaims {
            iss: &identity.issuer,
            sub: &identity.subject,
            aud: &grant.client_id,
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
            auth_time: identity.auth_time.timestamp(),
            nonce,
            email: &identity.email,
            email_verified: identity.email_verified,
            name: &identity.name,
            picture: &identity.picture,
            groups: &identity.groups,
            external_id: &identity.external_id,
        };

        self.keys.sign(&claims).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign ID token");
            EngineError::server("failed to sign ID token")
        })
    }

    /// Claims for the holder of `access_token`.
    pub async fn userinfo(&self, access_token: &str) -> EngineResult<serde_json::Value> {
        let grant = self.store.validate_access_token(access_token).await.ok_or(EngineError::InvalidToken)?;
        Ok(grant.identity.profile_claims())
    }

    /// Describe a token to the client it was issued to.
    ///
    /// Unknown and expired tokens, and tokens of other clients, are reported
    /// as inactive.
    pub async fn introspect(
        &self,
        form: &TokenLookupRequest,
        basic: Option<ClientCredentials>,
    ) -> EngineResult<Introspection> {
        let credentials = self.authenticate_caller(basic, form.credentials())?;

        let Some(token) = self.store.lookup(&form.token).await else {
            return Ok(Introspection::default());
        };
        if token.grant.client_id != credentials.client_id {
            tracing::debug!(client_id = %credentials.client_id, "Introspection of another client's token");
            return Ok(Introspection::default());
        }

        let identity = token.grant.identity;
        Ok(Introspection {
            active: true,
            scope: Some(token.grant.scopes.join(" ")),
            client_id: Some(token.grant.client_id.clone()),
            username: Some(identity.subject.clone()),
            token_type: Some(token.kind.as_str()),
            exp: Some(token.expires_at.timestamp()),
            iat: Some(token.issued_at.timestamp()),
            sub: Some(identity.subject),
            aud: Some(token.grant.client_id),
            iss: Some(identity.issuer),
        })
    }

    /// Revoke a token issued to the caller.
    ///
    /// Unknown tokens are not an error.
    pub async fn revoke(&self, form: &TokenLookupRequest, basic: Option<ClientCredentials>) -> EngineResult<()> {
        let credentials = self.authenticate_caller(basic, form.credentials())?;
        if self.store.revoke(&form.token, &credentials.client_id).await {
            tracing::info!(client_id = %credentials.client_id, "Revoked token");
        }
        Ok(())
    }
}

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

#[async_trait]
impl AuthorizationEngine for MemoryEngine {
    type Request = AuthorizeRequest;

    async fn new_authorization_request(&self, uri: &Uri) -> EngineResult<AuthorizeRequest> {
        let Query(query) = Query::<AuthorizeQuery>::try_from_uri(uri)
            .map_err(|e| EngineError::invalid_request(e.body_text()))?;

        let client_id = query.client_id.ok_or_else(|| EngineError::invalid_request("missing client_id"))?;
        let client = self.clients.get(&client_id).ok_or(EngineError::InvalidClient)?;

        // Nothing may be redirected to until redirect_uri is known to be registered.
        let redirect_uri = match query.redirect_uri {
            Some(uri) if client.redirect_uris.contains(&uri) => uri,
            Some(_) => return Err(EngineError::invalid_request("redirect_uri not registered for this client")),
            None => match client.redirect_uris.as_slice() {
                [only] => only.clone(),
                _ => return Err(EngineError::invalid_request("missing redirect_uri")),
            },
        };

        match query.response_type.as_deref() {
            Some("code") => {}
            Some(other) => return Err(EngineError::UnsupportedResponseType(other.to_owned())),
            None => return Err(EngineError::invalid_request("missing response_type")),
        }

        let code_challenge =
            pkce::challenge_from_request(query.code_challenge, query.code_challenge_method.as_deref())?;
        if client.is_public() && code_challenge.is_none() {
            return Err(EngineError::invalid_request("public clients must use PKCE"));
        }

        let requested_scopes = query
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_owned).collect())
            .unwrap_or_default();

        Ok(AuthorizeRequest {
            client_id,
            redirect_uri,
            state: query.state,
            requested_scopes,
            granted_scopes: Vec::new(),
            nonce: query.nonce,
            code_challenge,
        })
    }

    fn client_id<'a>(&self, request: &'a AuthorizeRequest) -> &'a str {
        &request.client_id
    }

    fn grant_scope(&self, request: &mut AuthorizeRequest, scope: &str) {
        if !request.granted_scopes.iter().any(|s| s == scope) {
            request.granted_scopes.push(scope.to_owned());
        }
    }

    async fn complete_authorization(
        &self,
        request: AuthorizeRequest,
        identity: IdentityAssertion,
    ) -> EngineResult<Response> {
        let mut location = url::Url::parse(&request.redirect_uri)
            .map_err(|e| EngineError::server(format!("invalid redirect_uri: {e}")))?;

        let subject = identity.subject.clone();
        let code = self
            .store
            .create_auth_code(AuthCodeGrant {
                client_id: request.client_id.clone(),
                redirect_uri: request.redirect_uri,
                code_challenge: request.code_challenge,
                scopes: request.granted_scopes,
                nonce: request.nonce,
                identity,
            })
            .await;

        {
            let mut pairs = location.query_pairs_mut();
            pairs.append_pair("code", &code);
            if let Some(state) = request.state.as_deref() {
                pairs.append_pair("state", state);
            }
        }

        tracing::info!(client_id = %request.client_id, subject = %subject, "Authorization granted");
        Ok(redirect(location.as_str()))
    }

    fn fail_authorization(&self, request: AuthorizeRequest, error: &BridgeError) -> Response {
        tracing::info!(client_id = %request.client_id, error = %error, "Authorization failed");

        let Ok(mut location) = url::Url::parse(&request.redirect_uri) else {
            return (error.status(), Json(serde_json::json!({ "error": error.to_user_message() })))
                .into_response();
        };

        {
            let mut pairs = location.query_pairs_mut();
            pairs.append_pair("error", error.oauth_error_code());
            pairs.append_pair("error_description", &error.to_user_message());
            if let Some(state) = request.state.as_deref() {
                pairs.append_pair("state", state);
            }
        }
        redirect(location.as_str())
    }

    fn current_signing_key_id(&self) -> String {
        self.keys.key_id().to_owned()
    }
}
