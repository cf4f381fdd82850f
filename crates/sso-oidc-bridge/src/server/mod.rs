//! HTTP server.
//!
//! Routes:
//! - `GET /` redirects to the SSO provider
//! - `GET /health`
//! - `GET <base>/auth`, `GET <base>/callback` run the SSO round trip
//! - `POST <base>/token`, `GET|POST <base>/userinfo`
//! - `POST <base>/introspect`, `POST <base>/revoke`
//! - `GET <base>/.well-known/openid-configuration`, `GET <base>/certs`

pub mod handlers;
pub mod oauth;

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, header};
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::bridge::SsoBridge;
use crate::config::{ClientRegistry, Config};
use crate::engine::{AuthorizationEngine, MemoryEngine};
use crate::session::SystemClock;

/// Shared state for HTTP handlers.
pub struct AppState<E: AuthorizationEngine> {
    pub config: Config,
    pub bridge: SsoBridge<E>,
}

impl<E: AuthorizationEngine> AppState<E> {
    #[must_use]
    pub fn new(config: Config, bridge: SsoBridge<E>) -> Self {
        Self { config, bridge }
    }

    /// Cookie path for the correlation cookie.
    #[must_use]
    pub fn cookie_path(&self) -> &str {
        if self.config.base_path.is_empty() { "/" } else { &self.config.base_path }
    }
}

impl AppState<MemoryEngine> {
    /// Wire the bridge to an in-memory engine on the wall clock.
    #[must_use]
    pub fn with_memory_engine(config: Config, clients: Arc<ClientRegistry>, engine: MemoryEngine) -> Self {
        let bridge = SsoBridge::new(&config, clients, Arc::new(engine), Arc::new(SystemClock));
        Self::new(config, bridge)
    }
}

impl<E: AuthorizationEngine> std::fmt::Debug for AppState<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("config", &self.config).field("bridge", &self.bridge).finish()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState<MemoryEngine>>) -> Router {
    let oauth = Router::new()
        .route("/auth", get(handlers::authorize::<MemoryEngine>))
        .route("/callback", get(handlers::callback::<MemoryEngine>))
        .route("/token", post(oauth::token))
        .route("/userinfo", get(oauth::userinfo).post(oauth::userinfo))
        .route("/introspect", post(oauth::introspect))
        .route("/revoke", post(oauth::revoke))
        .route("/.well-known/openid-configuration", get(oauth::discovery))
        .route("/certs", get(oauth::certs));

    let router = Router::new()
        .route("/", get(handlers::provider_redirect::<MemoryEngine>))
        .route("/health", get(handlers::health));

    // Nesting at "" is not allowed.
    let router = if state.config.base_path.is_empty() {
        router.merge(oauth)
    } else {
        router.nest(&state.config.base_path, oauth)
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve until Ctrl+C.
pub async fn serve(state: Arc<AppState<MemoryEngine>>) -> anyhow::Result<()> {
    let addr = state.config.listen_addr.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("HTTP server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

/// Scheme the client used, honoring `X-Forwarded-Proto` from a reverse proxy.
#[must_use]
pub fn request_scheme(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http")
}

/// Externally visible URL of the OAuth2 mount point. Also the token issuer.
#[must_use]
pub fn request_root(headers: &HeaderMap, base_path: &str) -> String {
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("localhost");
    format!("{}://{host}{base_path}", request_scheme(headers))
}
