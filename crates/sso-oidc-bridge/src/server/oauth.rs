//! Token, introspection, revocation, userinfo and discovery endpoints of the
//! in-memory engine.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::FormRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::{AppState, request_root};
use crate::engine::memory::TokenRequest;
use crate::engine::{ClientCredentials, Introspection, MemoryEngine, TokenLookupRequest, TokenResponse};
use crate::error::{EngineError, EngineResult};

type SharedState = Arc<AppState<MemoryEngine>>;

/// `POST <base>/token`
pub async fn token(
    State(state): State<SharedState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let response = match exchange(&state, &headers, form).await {
        Ok(tokens) => Json(tokens).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Token request failed");
            e.into_response()
        }
    };
    no_store(response)
}

async fn exchange(
    state: &AppState<MemoryEngine>,
    headers: &HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> EngineResult<TokenResponse> {
    let Form(form) = form.map_err(|e| EngineError::invalid_request(e.body_text()))?;
    let basic = basic_credentials(headers)?;
    state.bridge.engine().token(&form, basic).await
}

/// `POST <base>/introspect` (RFC 7662)
pub async fn introspect(
    State(state): State<SharedState>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> Response {
    let response = match inspect(&state, &headers, form).await {
        Ok(introspection) => Json(introspection).into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Introspection request failed");
            e.into_response()
        }
    };
    no_store(response)
}

async fn inspect(
    state: &AppState<MemoryEngine>,
    headers: &HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> EngineResult<Introspection> {
    let Form(form) = form.map_err(|e| EngineError::invalid_request(e.body_text()))?;
    let basic = basic_credentials(headers)?;
    state.bridge.engine().introspect(&form, basic).await
}

/// `POST <base>/revoke` (RFC 7009)
///
/// Answers `200` with an empty body whether or not the token was known.
pub async fn revoke(
    State(state): State<SharedState>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> Response {
    match revoke_token(&state, &headers, form).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::debug!(error = %e, "Revocation request failed");
            e.into_response()
        }
    }
}

async fn revoke_token(
    state: &AppState<MemoryEngine>,
    headers: &HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> EngineResult<()> {
    let Form(form) = form.map_err(|e| EngineError::invalid_request(e.body_text()))?;
    let basic = basic_credentials(headers)?;
    state.bridge.engine().revoke(&form, basic).await
}

/// `GET|POST <base>/userinfo`
pub async fn userinfo(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return EngineError::InvalidToken.into_response();
    };
    match state.bridge.engine().userinfo(token).await {
        Ok(claims) => no_store(Json(claims).into_response()),
        Err(e) => e.into_response(),
    }
}

/// `GET <base>/.well-known/openid-configuration`
pub async fn discovery(State(state): State<SharedState>, headers: HeaderMap) -> impl IntoResponse {
    let issuer = request_root(&headers, &state.config.base_path);
    Json(state.bridge.engine().discovery(&issuer))
}

/// `GET <base>/certs`
pub async fn certs(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.bridge.engine().jwks())
}

/// Credentials from an `Authorization: Basic` header, if one is present.
fn basic_credentials(headers: &HeaderMap) -> EngineResult<Option<ClientCredentials>> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| EngineError::InvalidClient)?;
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| EngineError::InvalidClient)?;
    let decoded = String::from_utf8(decoded).map_err(|_| EngineError::InvalidClient)?;
    let (client_id, client_secret) = decoded.split_once(':').ok_or(EngineError::InvalidClient)?;

    Ok(Some(ClientCredentials {
        client_id: form_decode(client_id),
        client_secret: Some(form_decode(client_secret)),
    }))
}

/// Undo the `application/x-www-form-urlencoded` step of RFC 6749 §2.3.1.
///
/// Text holding a raw `&` or `=` cannot have been encoded and is kept as sent.
fn form_decode(component: &str) -> String {
    if component.contains(['&', '=']) {
        return component.to_owned();
    }
    url::form_urlencoded::parse(component.as_bytes())
        .next()
        .map(|(decoded, _)| decoded.into_owned())
        .unwrap_or_default()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Token responses must not be cached (RFC 6749 §5.1).
fn no_store(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_credentials() {
        let mut headers = HeaderMap::new();
        assert!(basic_credentials(&headers).unwrap().is_none());

        let value = format!("Basic {}", STANDARD.encode("grafana:s3:cret"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        let credentials = basic_credentials(&headers).unwrap().unwrap();
        assert_eq!(credentials.client_id, "grafana");
        assert_eq!(credentials.client_secret.as_deref(), Some("s3:cret"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert!(matches!(basic_credentials(&headers), Err(EngineError::InvalidClient)));
    }

    #[test]
    fn test_basic_credentials_are_form_decoded() {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode("my%20app:a%2Bb%2Fc%3D%25+d"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        let credentials = basic_credentials(&headers).unwrap().unwrap();
        assert_eq!(credentials.client_id, "my app");
        assert_eq!(credentials.client_secret.as_deref(), Some("a+b/c=% d"));
    }

    #[test]
    fn test_form_decode_keeps_unencoded_text() {
        assert_eq!(form_decode("plain"), "plain");
        assert_eq!(form_decode("a=b&c"), "a=b&c");
        assert_eq!(form_decode(""), "");
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert!(bearer_token(&headers).is_none());
    }
}
