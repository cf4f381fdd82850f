//! End-to-end tests of the HTTP surface via axum's Router.
//!
//! The SSO provider is played by the test: it reads the handshake URL the
//! bridge redirects to and answers with a payload signed by the shared secret.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use tower::ServiceExt;

use sso_oidc_bridge::config::{ClientConfig, ClientRegistry, Config};
use sso_oidc_bridge::engine::MemoryEngine;
use sso_oidc_bridge::keys::SigningKey;
use sso_oidc_bridge::policy::GroupPolicy;
use sso_oidc_bridge::server::{AppState, create_router};
use sso_oidc_bridge::sso::{SsoAttributes, encode_signed_payload};

const TEST_KEY: &str = include_str!("fixtures/test_key.pem");
const SSO_SERVER: &str = "https://forum.example.com";
const SSO_SECRET: &str = "test-sso-secret";
const HOST: &str = "id.example.com";
const CODE_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

const CLI_REDIRECT: &str = "http://localhost:9000/cb";
const GRAFANA_REDIRECT: &str = "https://grafana.example.com/login/generic_oauth";
const OPS_REDIRECT: &str = "https://ops.example.com/cb";
/// Secret of the `ops` client, stored bcrypt-hashed.
const OPS_SECRET: &str = "p+ss/w=rd:1";

fn build_test_router(config: Config) -> Router {
    let clients = Arc::new(
        ClientRegistry::new()
            .with_client("cli", ClientConfig::new(None, vec![CLI_REDIRECT.into()]))
            .with_client(
                "grafana",
                ClientConfig::new(Some("grafana-secret".into()), vec![GRAFANA_REDIRECT.into()])
                    .with_group_policy(GroupPolicy::new(vec!["admins".into()], vec![])),
            )
            .with_client(
                "ops",
                ClientConfig::new(Some(pwhash::bcrypt::hash(OPS_SECRET).unwrap()), vec![OPS_REDIRECT.into()]),
            ),
    );
    let engine = MemoryEngine::new(Arc::clone(&clients), SigningKey::from_pkcs1_pem(TEST_KEY).unwrap());
    create_router(Arc::new(AppState::with_memory_engine(config, clients, engine)))
}

fn code_challenge() -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(CODE_VERIFIER.as_bytes()))
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::get(uri).header(header::HOST, HOST).header("X-Forwarded-Proto", "https")
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

/// `POST` a form with `client_secret_basic` credentials, form-encoding both halves.
async fn post_form(app: &Router, uri: &str, client_id: &str, secret: &str, form: &[(&str, &str)]) -> Response<Body> {
    let basic = format!("Basic {}", STANDARD.encode(format!("{}:{}", url_encode(client_id), url_encode(secret))));
    send(
        app,
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::AUTHORIZATION, basic)
            .body(Body::from(serde_urlencoded::to_string(form).unwrap()))
            .unwrap(),
    )
    .await
}

async fn json_body(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response.headers().get(header::LOCATION).unwrap().to_str().unwrap().to_owned()
}

fn query_of(location: &str) -> HashMap<String, String> {
    url::Url::parse(location).unwrap().query_pairs().into_owned().collect()
}

fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_owned())
        .collect()
}

/// Correlation cookie value and the payload sent to the provider.
struct Handshake {
    cookie: String,
    payload: SsoAttributes,
}

async fn start_authorization(app: &Router, query: &str) -> Handshake {
    let response = send(app, get(&format!("/oauth2/auth?{query}")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let redirect = location(&response);
    assert!(redirect.starts_with(&format!("{SSO_SERVER}/session/sso_provider?")));

    let cookie = set_cookies(&response)
        .into_iter()
        .find(|c| c.starts_with("oidc_session="))
        .expect("correlation cookie");
    let cookie = cookie.split(';').next().unwrap().to_owned();

    let sso = query_of(&redirect).remove("sso").unwrap();
    let payload = SsoAttributes::parse(&STANDARD.decode(sso).unwrap());
    Handshake { cookie, payload }
}

/// Play the SSO provider: sign `attributes` for the handshake's nonce.
async fn provider_callback(app: &Router, handshake: &Handshake, attributes: &str) -> Response<Body> {
    let nonce = handshake.payload.get("nonce").unwrap();
    let (sso, sig) = encode_signed_payload(&format!("nonce={nonce}&{attributes}"), SSO_SECRET).unwrap();
    let query = serde_urlencoded::to_string([("sso", sso), ("sig", sig)]).unwrap();

    send(
        app,
        get(&format!("/oauth2/callback?{query}"))
            .header(header::COOKIE, &handshake.cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

fn cli_authorize_query() -> String {
    format!(
        "client_id=cli&redirect_uri={}&response_type=code&scope=openid&state=xyz123&nonce=n-0S6&code_challenge={}&code_challenge_method=S256",
        url_encode(CLI_REDIRECT),
        code_challenge(),
    )
}

#[tokio::test]
async fn test_full_sso_oidc_flow() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));

    // 1. Authorize: redirect to the SSO provider with the correlation cookie
    let response = send(&app, get(&format!("/oauth2/auth?{}", cli_authorize_query())).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let cookie = set_cookies(&response).into_iter().find(|c| c.starts_with("oidc_session=")).unwrap();
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("Path=/oauth2"));
    assert!(cookie.contains("Max-Age=600"));

    let handshake = start_authorization(&app, &cli_authorize_query()).await;
    assert_eq!(handshake.payload.get("return_sso_url"), Some("https://id.example.com/oauth2/callback"));

    // 2. Provider calls back with a signed payload
    let response = provider_callback(
        &app,
        &handshake,
        "username=alice&email=alice%40example.com&name=Alice&groups=staff%2Cdev&external_id=7",
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(set_cookies(&response).iter().any(|c| c.starts_with("oidc_session=")), "cookie cleared");

    let redirect = location(&response);
    assert!(redirect.starts_with(CLI_REDIRECT));
    let params = query_of(&redirect);
    assert_eq!(params["state"], "xyz123");
    let code = params["code"].clone();

    // 3. Exchange the code with PKCE
    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", &code),
        ("redirect_uri", CLI_REDIRECT),
        ("code_verifier", CODE_VERIFIER),
        ("client_id", "cli"),
    ])
    .unwrap();
    let response = send(
        &app,
        Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");

    let tokens = json_body(response).await;
    assert_eq!(tokens["token_type"], "Bearer");
    assert_eq!(tokens["expires_in"], 1800);
    let access_token = tokens["access_token"].as_str().unwrap().to_owned();
    let id_token = tokens["id_token"].as_str().unwrap();

    // 4. The ID token is signed with the published key
    let response = send(&app, get("/oauth2/certs").body(Body::empty()).unwrap()).await;
    let jwks = json_body(response).await;
    let jwt_header = jsonwebtoken::decode_header(id_token).unwrap();
    assert_eq!(jwt_header.alg, jsonwebtoken::Algorithm::RS256);
    assert_eq!(jwt_header.kid.as_deref(), jwks["keys"][0]["kid"].as_str());

    // 5. Userinfo
    let response = send(
        &app,
        Request::get("/oauth2/userinfo")
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let claims = json_body(response).await;
    assert_eq!(claims["sub"], "alice");
    assert_eq!(claims["email"], "alice@example.com");
    assert_eq!(claims["email_verified"], true);
    assert_eq!(claims["groups"], serde_json::json!(["staff", "dev"]));
    assert_eq!(claims["iss"], "https://id.example.com/oauth2");

    // 6. The code cannot be replayed
    let form = serde_urlencoded::to_string([
        ("grant_type", "authorization_code"),
        ("code", &code),
        ("code_verifier", CODE_VERIFIER),
        ("client_id", "cli"),
    ])
    .unwrap();
    let response = send(
        &app,
        Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_confidential_client_with_basic_auth() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let query = "client_id=grafana&response_type=code&scope=openid&state=s1";

    let handshake = start_authorization(&app, query).await;
    let response = provider_callback(&app, &handshake, "username=root&groups=admins").await;
    let params = query_of(&location(&response));
    assert_eq!(params["state"], "s1");

    let form = serde_urlencoded::to_string([("grant_type", "authorization_code"), ("code", &params["code"])]).unwrap();
    let basic = format!("Basic {}", STANDARD.encode("grafana:grafana-secret"));
    let response = send(
        &app,
        Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::AUTHORIZATION, basic)
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = json_body(response).await;
    assert!(tokens["refresh_token"].is_string());

    // Refresh rotates the pair
    let form = serde_urlencoded::to_string([
        ("grant_type", "refresh_token"),
        ("refresh_token", tokens["refresh_token"].as_str().unwrap()),
        ("client_id", "grafana"),
        ("client_secret", "grafana-secret"),
    ])
    .unwrap();
    let response = send(
        &app,
        Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let refreshed = json_body(response).await;
    assert_ne!(refreshed["access_token"], tokens["access_token"]);
}

#[tokio::test]
async fn test_introspect_and_revoke_with_hashed_secret() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let handshake = start_authorization(&app, "client_id=ops&response_type=code&state=s3").await;
    let response = provider_callback(&app, &handshake, "username=carol&groups=ops").await;
    let code = query_of(&location(&response))["code"].clone();

    // The secret contains characters that must be form-encoded inside Basic credentials.
    let response =
        post_form(&app, "/oauth2/token", "ops", OPS_SECRET, &[("grant_type", "authorization_code"), ("code", &code)])
            .await;
    assert_eq!(response.status(), StatusCode::OK);
    let tokens = json_body(response).await;
    let access_token = tokens["access_token"].as_str().unwrap().to_owned();
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_owned();

    let response = post_form(&app, "/oauth2/introspect", "ops", OPS_SECRET, &[("token", &access_token)]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let info = json_body(response).await;
    assert_eq!(info["active"], true);
    assert_eq!(info["sub"], "carol");
    assert_eq!(info["client_id"], "ops");
    assert_eq!(info["token_type"], "access_token");

    let response = post_form(
        &app,
        "/oauth2/revoke",
        "ops",
        OPS_SECRET,
        &[("token", &refresh_token), ("token_type_hint", "refresh_token")],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_form(&app, "/oauth2/introspect", "ops", OPS_SECRET, &[("token", &access_token)]).await;
    assert_eq!(json_body(response).await, serde_json::json!({ "active": false }));

    let response = post_form(&app, "/oauth2/revoke", "ops", "wrong", &[("token", &access_token)]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_wrong_client_secret_rejected() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let form = serde_urlencoded::to_string([("grant_type", "authorization_code"), ("code", "whatever")]).unwrap();
    let basic = format!("Basic {}", STANDARD.encode("grafana:nope"));

    let response = send(
        &app,
        Request::post("/oauth2/token")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::AUTHORIZATION, basic)
            .body(Body::from(form))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_policy_denial_redirects_with_access_denied() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let handshake = start_authorization(&app, "client_id=grafana&response_type=code&state=s2").await;

    let response = provider_callback(&app, &handshake, "username=bob&groups=staff").await;
    assert_eq!(response.status(), StatusCode::FOUND);

    let redirect = location(&response);
    assert!(redirect.starts_with(GRAFANA_REDIRECT));
    let params = query_of(&redirect);
    assert_eq!(params["error"], "access_denied");
    assert!(params["error_description"].contains("not in allowed groups"));
    assert_eq!(params["state"], "s2");
    assert!(!params.contains_key("code"));
}

#[tokio::test]
async fn test_forged_callback_redirects_with_access_denied() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let handshake = start_authorization(&app, &cli_authorize_query()).await;

    // Signature of an honest payload attached to an escalated one.
    let nonce = handshake.payload.get("nonce").unwrap();
    let (_, sig) = encode_signed_payload(&format!("nonce={nonce}&username=mallory"), SSO_SECRET).unwrap();
    let forged = STANDARD.encode(format!("nonce={nonce}&username=mallory&groups=admins"));

    let query = serde_urlencoded::to_string([("sso", forged), ("sig", sig)]).unwrap();
    let response = send(
        &app,
        get(&format!("/oauth2/callback?{query}"))
            .header(header::COOKIE, &handshake.cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(query_of(&location(&response))["error"], "access_denied");
}

#[tokio::test]
async fn test_callback_without_cookie_is_bad_request() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let (sso, sig) = encode_signed_payload("nonce=1&username=alice", SSO_SECRET).unwrap();
    let query = serde_urlencoded::to_string([("sso", sso), ("sig", sig)]).unwrap();

    let response = send(&app, get(&format!("/oauth2/callback?{query}")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "invalid session, please try again");
}

#[tokio::test]
async fn test_callback_replay_is_bad_request() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));
    let handshake = start_authorization(&app, &cli_authorize_query()).await;

    let first = provider_callback(&app, &handshake, "username=alice").await;
    assert_eq!(first.status(), StatusCode::FOUND);

    let second = provider_callback(&app, &handshake, "username=alice").await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_authorization_request_rejected() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));

    // Public client without PKCE
    let query = format!("client_id=cli&redirect_uri={}&response_type=code", url_encode(CLI_REDIRECT));
    let response = send(&app, get(&format!("/oauth2/auth?{query}")).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(set_cookies(&response).is_empty());
    assert_eq!(json_body(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_userinfo_requires_token() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));

    let response = send(&app, Request::get("/oauth2/userinfo").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

    let response = send(
        &app,
        Request::post("/oauth2/userinfo")
            .header(header::AUTHORIZATION, "Bearer not-a-token")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_discovery_uses_request_origin() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));

    let response = send(&app, get("/oauth2/.well-known/openid-configuration").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc = json_body(response).await;
    assert_eq!(doc["issuer"], "https://id.example.com/oauth2");
    assert_eq!(doc["token_endpoint"], "https://id.example.com/oauth2/token");
    assert_eq!(doc["jwks_uri"], "https://id.example.com/oauth2/certs");
}

#[tokio::test]
async fn test_root_redirects_to_provider_and_health() {
    let app = build_test_router(Config::for_testing(SSO_SERVER));

    let response = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), SSO_SERVER);

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn test_routes_at_root_base_path() {
    let app = build_test_router(Config::for_testing(SSO_SERVER).with_base_path("/"));

    let response = send(&app, Request::get("/certs").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, get(&format!("/auth?{}", cli_authorize_query())).body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let cookie = set_cookies(&response).into_iter().find(|c| c.starts_with("oidc_session=")).unwrap();
    assert!(cookie.contains("Path=/"));

    let redirect = location(&response);
    let sso = query_of(&redirect).remove("sso").unwrap();
    let payload = SsoAttributes::parse(&STANDARD.decode(sso).unwrap());
    assert_eq!(payload.get("return_sso_url"), Some("https://id.example.com/callback"));
}
