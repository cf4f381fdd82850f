//! OAuth2/OIDC engine contract.
//!
//! The bridge never parses OAuth2 requests or mints tokens itself. It creates
//! requests, grants scopes and completes or fails them through
//! [`AuthorizationEngine`]. [`MemoryEngine`] is the in-process implementation
//! used by the server binary.

pub mod memory;
pub mod pkce;
pub mod store;

use async_trait::async_trait;
use axum::http::Uri;
use axum::response::Response;

pub use memory::{AuthorizeRequest, ClientCredentials, Introspection, MemoryEngine, TokenLookupRequest, TokenResponse};
pub use store::TokenStore;

use crate::claims::IdentityAssertion;
use crate::error::{BridgeError, EngineResult};

/// The OAuth2/OIDC protocol engine the bridge hands identities to.
#[async_trait]
pub trait AuthorizationEngine: Send + Sync + 'static {
    /// In-progress authorization request. Held by the bridge while the user
    /// is at the SSO provider, never inspected.
    type Request: Send + 'static;

    /// Parse and validate an authorization request.
    async fn new_authorization_request(&self, uri: &Uri) -> EngineResult<Self::Request>;

    /// Id of the client that made `request`. Used to look up its group policy.
    fn client_id<'a>(&self, request: &'a Self::Request) -> &'a str;

    /// Grant `scope` on `request`.
    fn grant_scope(&self, request: &mut Self::Request, scope: &str);

    /// Finish a successful authorization and produce the response for the user agent.
    async fn complete_authorization(
        &self,
        request: Self::Request,
        identity: IdentityAssertion,
    ) -> EngineResult<Response>;

    /// Report a failed authorization to the client.
    fn fail_authorization(&self, request: Self::Request, error: &BridgeError) -> Response;

    /// `kid` of the key currently used to sign tokens.
    fn current_signing_key_id(&self) -> String;
}
