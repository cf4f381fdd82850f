//! Handlers for the SSO round trip.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;

use super::{AppState, request_root, request_scheme};
use crate::config::defaults::SESSION_COOKIE;
use crate::engine::AuthorizationEngine;
use crate::error::BridgeError;

/// Query parameters the SSO provider sends back.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    #[serde(default)]
    pub sso: String,
    #[serde(default)]
    pub sig: String,
}

/// `GET /`
///
/// Nothing lives here; send the user to the SSO provider's site.
pub async fn provider_redirect<E: AuthorizationEngine>(State(state): State<Arc<AppState<E>>>) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, state.config.sso_server.clone())]).into_response()
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sso-oidc-bridge",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// `GET <base>/auth`
///
/// Validate the authorization request, park it, and redirect to the SSO
/// provider with the correlation cookie set.
pub async fn authorize<E: AuthorizationEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
    uri: Uri,
    jar: CookieJar,
) -> Response {
    let request = match state.bridge.engine().new_authorization_request(&uri).await {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected authorization request");
            return BridgeError::from(e).into_response();
        }
    };

    let root = request_root(&headers, &state.config.base_path);
    let handshake = match state.bridge.begin(request, &root).await {
        Ok(handshake) => handshake,
        Err(e) => return e.into_response(),
    };

    let cookie = Cookie::build((SESSION_COOKIE, handshake.correlation_id))
        .path(state.cookie_path().to_owned())
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(request_scheme(&headers) == "https")
        .max_age(time::Duration::try_from(state.config.pending_ttl).unwrap_or(time::Duration::MAX));

    (StatusCode::FOUND, jar.add(cookie), [(header::LOCATION, handshake.redirect_url)]).into_response()
}

/// `GET <base>/callback?sso=…&sig=…`
///
/// The correlation cookie is cleared whatever the outcome.
pub async fn callback<E: AuthorizationEngine>(
    State(state): State<Arc<AppState<E>>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
    jar: CookieJar,
) -> Response {
    let root = request_root(&headers, &state.config.base_path);
    let correlation_id = jar.get(SESSION_COOKIE).map(|c| c.value().to_owned());

    let response = state.bridge.finish(correlation_id.as_deref(), &query.sso, &query.sig, &root).await;

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path(state.cookie_path().to_owned()));
    (jar, response).into_response()
}
