//! Glue between the OAuth2 engine and the SSO provider.
//!
//! ```text
//! auth ──► begin ──► PendingStore ──► redirect to provider
//!                                         │
//! callback ◄──────────────────────────────┘
//!    └─► resolve ─► validate_callback ─► group policy ─► build_identity ─► engine
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::response::{IntoResponse, Response};
use tokio::task::JoinHandle;

use crate::claims::{IdentityAssertion, build_identity};
use crate::config::{ClientRegistry, Config};
use crate::engine::AuthorizationEngine;
use crate::error::{BridgeError, BridgeResult};
use crate::policy::{self, PolicyDecision};
use crate::session::{Clock, PendingStore};
use crate::sso;

/// Scope granted once the user passes the group policy.
const GRANTED_SCOPE: &str = "openid";

/// Where to send the user agent after `begin`.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Value for the correlation cookie.
    pub correlation_id: String,
    /// Signed URL on the SSO provider.
    pub redirect_url: String,
}

/// Runs SSO round trips on behalf of an [`AuthorizationEngine`].
pub struct SsoBridge<E: AuthorizationEngine> {
    engine: Arc<E>,
    pending: Arc<PendingStore<E::Request>>,
    clients: Arc<ClientRegistry>,
    clock: Arc<dyn Clock>,
    sso_server: String,
    sso_secret: String,
}

impl<E: AuthorizationEngine> SsoBridge<E> {
    #[must_use]
    pub fn new(config: &Config, clients: Arc<ClientRegistry>, engine: Arc<E>, clock: Arc<dyn Clock>) -> Self {
        let pending = PendingStore::new(Arc::clone(&clock), config.pending_ttl, config.max_pending);
        Self {
            engine,
            pending: Arc::new(pending),
            clients,
            clock,
            sso_server: config.sso_server.clone(),
            sso_secret: config.sso_secret.clone(),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Start sweeping expired pending authorizations.
    pub fn start_reaper(&self, interval: Duration) -> JoinHandle<()> {
        Arc::clone(&self.pending).start_reaper(interval)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.pending_count().await
    }

    /// Park `request` and build the redirect to the SSO provider.
    ///
    /// `root` is the externally visible URL of the OAuth2 mount point; the
    /// provider is told to return to `<root>/callback`.
    pub async fn begin(&self, request: E::Request, root: &str) -> BridgeResult<Handshake> {
        let (correlation_id, nonce) = self.pending.begin(request).await?;
        let callback_url = format!("{root}/callback");
        let redirect_url = sso::build_handshake_url(&self.sso_server, &callback_url, &self.sso_secret, nonce)?;

        tracing::debug!(correlation_id = %correlation_id, "Redirecting to SSO provider");
        Ok(Handshake { correlation_id, redirect_url })
    }

    /// Handle the provider's callback.
    ///
    /// Without a live pending record there is no request to fail, so the user
    /// gets a plain `400`. Every later failure goes back through the engine.
    pub async fn finish(&self, correlation_id: Option<&str>, sso: &str, sig: &str, root: &str) -> Response {
        let Some(correlation_id) = correlation_id else {
            tracing::debug!("Callback without correlation cookie");
            return BridgeError::SessionNotFound.into_response();
        };

        let pending = match self.pending.resolve(correlation_id).await {
            Ok(pending) => pending,
            Err(e) => return e.into_response(),
        };

        let mut request = pending.request;
        match self.authorize(&mut request, pending.nonce, sso, sig, root) {
            Ok(identity) => match self.engine.complete_authorization(request, identity).await {
                Ok(response) => response,
                Err(e) => {
                    let error = BridgeError::from(e);
                    tracing::error!(error = %error, "Failed to complete authorization");
                    error.into_response()
                }
            },
            Err(e) => self.engine.fail_authorization(request, &e),
        }
    }

    fn authorize(
        &self,
        request: &mut E::Request,
        nonce: u64,
        sso: &str,
        sig: &str,
        root: &str,
    ) -> BridgeResult<IdentityAssertion> {
        let attributes = sso::validate_callback(sso, sig, &self.sso_secret, nonce).inspect_err(|e| {
            if matches!(e, BridgeError::SignatureMismatch | BridgeError::NonceReplay) {
                tracing::warn!(error = %e, "Rejected SSO callback");
            }
        })?;

        let client_id = self.engine.client_id(request);
        let groups = attributes.groups();
        if let PolicyDecision::Deny(reason) = policy::evaluate(self.clients.group_policy(client_id), &groups) {
            tracing::info!(
                client_id = %client_id,
                user = %attributes.get_or_empty("username"),
                reason = %reason,
                "Group policy denied access"
            );
            return Err(BridgeError::PolicyDenied(reason));
        }

        self.engine.grant_scope(request, GRANTED_SCOPE);
        Ok(build_identity(root, &attributes, &self.engine.current_signing_key_id(), self.clock.now()))
    }
}

impl<E: AuthorizationEngine> std::fmt::Debug for SsoBridge<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoBridge")
            .field("sso_server", &self.sso_server)
            .field("pending", &self.pending)
            .finish()
    }
}
