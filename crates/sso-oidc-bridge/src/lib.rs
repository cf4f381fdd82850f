//! SSO to OpenID Connect bridge
//!
//! Lets OIDC relying parties log users in against a forum that only speaks
//! the Discourse-style signed SSO handshake.
//!
//! # Flow
//!
//! 1. A relying party sends the user to `<base>/auth`.
//! 2. The bridge parks the request in a [`PendingStore`](session::PendingStore)
//!    and redirects to the forum with a signed, nonce-bearing payload.
//! 3. The forum redirects back to `<base>/callback`; the signature, nonce and
//!    the client's [`GroupPolicy`](policy::GroupPolicy) are checked.
//! 4. The [`AuthorizationEngine`](engine::AuthorizationEngine) issues a code,
//!    which the relying party exchanges for tokens.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sso_oidc_bridge::config::{ClientRegistry, Config};
//! use sso_oidc_bridge::engine::MemoryEngine;
//! use sso_oidc_bridge::keys::SigningKey;
//! use sso_oidc_bridge::server::{self, AppState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::new("https://forum.example.com", "sso-secret");
//!     let clients = Arc::new(ClientRegistry::load("clients.json".as_ref())?);
//!     let engine = MemoryEngine::new(Arc::clone(&clients), SigningKey::generate()?);
//!
//!     server::serve(Arc::new(AppState::with_memory_engine(config, clients, engine))).await
//! }
//! ```

pub mod bridge;
pub mod claims;
pub mod config;
pub mod engine;
pub mod error;
pub mod keys;
pub mod policy;
pub mod server;
pub mod session;
pub mod sso;

pub use bridge::SsoBridge;
pub use config::Config;
pub use error::{BridgeError, EngineError};
