//! Error types for the SSO bridge and the OAuth2 engine.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Errors from a single SSO round trip.
///
/// Every variant is terminal for the attempt. Recovery is always a fresh
/// authorization request.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// The callback MAC does not match the payload.
    #[error("wrong signature from SSO provider")]
    SignatureMismatch,

    /// Signature was valid but the nonce is not the one issued for this session.
    #[error("wrong nonce from SSO provider")]
    NonceReplay,

    /// The payload could not be decoded or lacks a numeric nonce.
    #[error("malformed SSO payload: {0}")]
    MalformedPayload(String),

    /// No pending authorization matches the correlation cookie.
    #[error("invalid session, please try again")]
    SessionNotFound,

    /// The user authenticated but the client's group policy rejects them.
    #[error("access denied: {0}")]
    PolicyDenied(String),

    /// The shared SSO secret cannot key an HMAC.
    #[error("unusable SSO secret: {0}")]
    InvalidSecret(String),

    /// Too many authorizations are waiting for a callback.
    #[error("too many pending authorizations, please try again later")]
    TooManyPending,

    /// The OAuth2 engine failed while completing the authorization.
    #[error("authorization engine error: {0}")]
    Engine(#[from] EngineError),
}

impl BridgeError {
    /// Create a malformed payload error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload(reason.into())
    }

    /// Create a policy denial.
    #[must_use]
    pub fn policy_denied(reason: impl Into<String>) -> Self {
        Self::PolicyDenied(reason.into())
    }

    /// OAuth2 error code used when the failure is reported to the client.
    #[must_use]
    pub const fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::SignatureMismatch | Self::NonceReplay | Self::PolicyDenied(_) => "access_denied",
            Self::MalformedPayload(_) | Self::SessionNotFound => "invalid_request",
            Self::TooManyPending => "temporarily_unavailable",
            Self::InvalidSecret(_) => "server_error",
            Self::Engine(e) => e.code(),
        }
    }

    /// HTTP status used when the error is rendered without an engine redirect.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::SessionNotFound | Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::SignatureMismatch | Self::NonceReplay | Self::PolicyDenied(_) => {
                StatusCode::FORBIDDEN
            }
            Self::TooManyPending => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidSecret(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => e.status(),
        }
    }

    /// Convert to a message suitable for showing to the end user.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::PolicyDenied(reason) => {
                format!("You are not allowed to access this application: {reason}")
            }
            Self::SessionNotFound => "invalid session, please try again".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        match self {
            Self::Engine(e) => e.into_response(),
            other => (other.status(), Json(serde_json::json!({ "error": other.to_user_message() }))).into_response(),
        }
    }
}

/// Errors from the OAuth2/OIDC engine, carrying RFC 6749 error codes.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// The request is missing a parameter or is otherwise malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Client authentication failed or the client is unknown.
    #[error("invalid client")]
    InvalidClient,

    /// The grant (code or refresh token) is invalid, expired, or already used.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Only `response_type=code` is supported.
    #[error("unsupported response type: {0}")]
    UnsupportedResponseType(String),

    /// Only `authorization_code` and `refresh_token` are supported.
    #[error("unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// The bearer token is unknown or expired.
    #[error("invalid token")]
    InvalidToken,

    /// Internal failure, e.g. token signing.
    #[error("server error: {0}")]
    Server(String),
}

impl EngineError {
    /// Create an invalid request error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid grant error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant(message.into())
    }

    /// Create a server error.
    #[must_use]
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server(message.into())
    }

    /// The RFC 6749 `error` field.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::InvalidToken => "invalid_token",
            Self::Server(_) => "server_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient | Self::InvalidToken => StatusCode::UNAUTHORIZED,
            Self::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (
            status,
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.to_string()
            })),
        )
            .into_response();

        if status == StatusCode::UNAUTHORIZED {
            let challenge = format!("Bearer error=\"{}\"", self.code());
            if let Ok(value) = HeaderValue::from_str(&challenge) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
