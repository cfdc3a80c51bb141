// ABOUTME: HTTP-level tests of the assembled router
// ABOUTME: Health, JWKS, LTI 1.1 and 1.3 launches end to end, LMS error redirects and session-guarded API routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lti_launch::clock::{Clock, ManualClock};
use lti_launch::context::ServerResources;
use lti_launch::identity::h_userid;
use lti_launch::routes::router;
use lti_launch::tasks::rotate_keys;

use common::{
    create_lti11_instance, create_lti13_instance, form_body, id_token_claims, lti11_launch_params,
    lti11_launch_url, now_ts, platform_jwks, random_nonce, sign_id_token, sign_lti11,
    state_and_nonce, test_resources, AUTHORITY, CLIENT_ID, ISSUER, LMS_GUID, PLATFORM_KEY,
    PLATFORM_KID,
};

const FORM: &str = "application/x-www-form-urlencoded";

fn app(resources: &ServerResources) -> Router {
    router(Arc::new(resources.clone()))
}

async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_form(uri: &str, params: &[(String, String)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, FORM)
        .body(Body::from(form_body(params)))
        .unwrap()
}

fn location(response: &Response) -> Url {
    Url::parse(
        response
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap(),
    )
    .unwrap()
}

fn session_cookie(response: &Response) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_owned()
}

#[tokio::test]
async fn test_health() {
    let (resources, _) = test_resources().await;

    let response = send(app(&resources), get("/health")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn test_jwks_publishes_active_keys() {
    let (resources, _) = test_resources().await;
    rotate_keys(&resources).await.unwrap();

    let response = send(app(&resources), get("/lti/1.3/jwks")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let document = body_json(response).await;
    let keys = document["keys"].as_array().unwrap();
    assert_eq!(keys.len(), resources.config.key_rotation.target_keys);
    assert!(keys.iter().all(|key| key["kty"] == "RSA" && key.get("d").is_none()));
}

#[tokio::test]
async fn test_lti11_launch_sets_session_and_renders_grant_token() {
    let (resources, clock) = test_resources().await;
    let (instance, key, secret) = create_lti11_instance(&resources).await;
    let form = sign_lti11(
        &lti11_launch_url(),
        lti11_launch_params(),
        &key,
        &secret,
        now_ts(&clock),
        &random_nonce(),
    );

    let response = send(app(&resources), post_form("/lti_launches", &form)).await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = session_cookie(&response);
    assert!(cookie.starts_with("session="));
    let html = body_text(response).await;
    assert!(html.contains("name=\"grant-token\""));
    assert!(html.contains("\"display_name\":\"Ada Lovelace\""));

    let request = Request::builder()
        .uri("/api/grant_token")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(app(&resources), request).await;
    assert_eq!(response.status(), StatusCode::OK);
    let token = body_json(response).await["grant_token"]
        .as_str()
        .unwrap()
        .to_owned();
    let claims = resources.grant_tokens.verify(&token).unwrap();
    assert_eq!(claims.sub, h_userid(LMS_GUID, "lms-user-42", AUTHORITY));

    let stored = resources.tenants.require(instance.id).await.unwrap();
    assert_eq!(stored.tool_consumer_instance_guid.as_deref(), Some(LMS_GUID));
}

#[tokio::test]
async fn test_replayed_lti11_launch_is_401() {
    let (resources, clock) = test_resources().await;
    let (_, key, secret) = create_lti11_instance(&resources).await;
    let form = sign_lti11(
        &lti11_launch_url(),
        lti11_launch_params(),
        &key,
        &secret,
        now_ts(&clock),
        &random_nonce(),
    );

    let first = send(app(&resources), post_form("/lti_launches", &form)).await;
    assert_eq!(first.status(), StatusCode::OK);

    let replay = send(app(&resources), post_form("/lti_launches", &form)).await;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    assert!(replay.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_missing_launch_param_redirects_back_to_lms() {
    let (resources, clock) = test_resources().await;
    let (_, key, secret) = create_lti11_instance(&resources).await;
    let mut params: Vec<(String, String)> = lti11_launch_params()
        .into_iter()
        .filter(|(name, _)| name != "context_id")
        .collect();
    params.push((
        "launch_presentation_return_url".to_owned(),
        "https://lms.example.edu/courses/101/return?x=1".to_owned(),
    ));
    let form = sign_lti11(
        &lti11_launch_url(),
        params,
        &key,
        &secret,
        now_ts(&clock),
        &random_nonce(),
    );

    let response = send(app(&resources), post_form("/lti_launches", &form)).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let target = location(&response);
    assert_eq!(target.host_str(), Some("lms.example.edu"));
    assert!(target
        .query_pairs()
        .any(|(name, value)| name == "lti_errormsg" && !value.is_empty()));
    assert!(target.query_pairs().any(|(name, value)| name == "x" && value == "1"));
}

#[tokio::test]
async fn test_missing_launch_param_without_return_url_is_422() {
    let (resources, clock) = test_resources().await;
    let (_, key, secret) = create_lti11_instance(&resources).await;
    let params: Vec<(String, String)> = lti11_launch_params()
        .into_iter()
        .filter(|(name, _)| name != "context_id")
        .collect();
    let form = sign_lti11(
        &lti11_launch_url(),
        params,
        &key,
        &secret,
        now_ts(&clock),
        &random_nonce(),
    );

    let response = send(app(&resources), post_form("/lti_launches", &form)).await;

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "missing_launch_param");
    assert_eq!(body["field"], "context_id");
}

#[tokio::test]
async fn test_bad_signature_is_401_without_detail() {
    let (resources, clock) = test_resources().await;
    let (_, key, _) = create_lti11_instance(&resources).await;
    let form = sign_lti11(
        &lti11_launch_url(),
        lti11_launch_params(),
        &key,
        "not-the-secret",
        now_ts(&clock),
        &random_nonce(),
    );

    let response = send(app(&resources), post_form("/lti_launches", &form)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body = body_json(response).await;
    assert_eq!(body, json!({ "error_code": "lti_oauth_error" }));
}

#[tokio::test]
async fn test_non_form_launch_is_rejected() {
    let (resources, _) = test_resources().await;
    let request = Request::builder()
        .method("POST")
        .uri("/lti_launches")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();

    let response = send(app(&resources), request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_lti13_login_and_launch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(platform_jwks()))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        "https://platform.invalid/token",
    )
    .await;

    let login = format!(
        "/lti/1.3/oidc?iss={}&login_hint=hint-1&client_id={CLIENT_ID}&target_link_uri={}",
        urlencoding::encode(ISSUER),
        urlencoding::encode("https://lti.example.com/lti/1.3/launches"),
    );
    let response = send(app(&resources), get(&login)).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect
        .query_pairs()
        .any(|(name, value)| name == "redirect_uri"
            && value == "https://lti.example.com/lti/1.3/launches"));
    let (state, nonce) = state_and_nonce(&redirect);

    let claims = id_token_claims(&nonce, clock.now());
    let id_token = sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID);
    let form = vec![
        ("id_token".to_owned(), id_token),
        ("state".to_owned(), state),
    ];
    let response = send(app(&resources), post_form("/lti/1.3/launches", &form)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(session_cookie(&response).starts_with("session="));
    let html = body_text(response).await;
    assert!(html.contains("\"lti_version\":\"1.3\""));
    assert!(html.contains("Grace Hopper"));
}

#[tokio::test]
async fn test_lti13_launch_with_forged_state_is_401() {
    let (resources, _) = test_resources().await;
    let form = vec![
        ("id_token".to_owned(), "a.b.c".to_owned()),
        ("state".to_owned(), "never-issued".to_owned()),
    ];

    let response = send(app(&resources), post_form("/lti/1.3/launches", &form)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error_code"], "lti13_error");
    assert_eq!(body["message"], "LTI 1.3 launch validation failed");
}

#[tokio::test]
async fn test_api_requires_session() {
    let (resources, _) = test_resources().await;

    let response = send(app(&resources), get("/api/grant_token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/grant_token")
        .header(header::AUTHORIZATION, "Bearer forged.token.value")
        .body(Body::empty())
        .unwrap();
    let response = send(app(&resources), request).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unknown_oauth2_service_is_404() {
    let (resources, _) = test_resources().await;

    let response = send(app(&resources), get("/api/moodle/oauth/authorize")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

async fn launch_session(resources: &ServerResources, clock: &ManualClock) -> String {
    let (_, key, secret) = create_lti11_instance(resources).await;
    let form = sign_lti11(
        &lti11_launch_url(),
        lti11_launch_params(),
        &key,
        &secret,
        now_ts(clock),
        &random_nonce(),
    );
    let launch = send(app(resources), post_form("/lti_launches", &form)).await;
    session_cookie(&launch)
}

#[tokio::test]
async fn test_authorize_without_developer_key_reports_problem_code() {
    let (resources, clock) = test_resources().await;
    let cookie = launch_session(&resources, &clock).await;

    let request = Request::builder()
        .uri("/api/canvas/oauth/authorize")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(app(&resources), request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["error_code"],
        "oauth2_client_not_configured"
    );
}

#[tokio::test]
async fn test_oauth2_callback_with_bad_state_is_rejected() {
    let (resources, clock) = test_resources().await;
    let cookie = launch_session(&resources, &clock).await;

    let request = Request::builder()
        .uri("/api/canvas/oauth/callback?code=abc&state=forged")
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap();
    let response = send(app(&resources), request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error_code"], "invalid_input");
}

#[tokio::test]
async fn test_oauth2_callback_requires_the_requesting_session() {
    let (resources, _) = test_resources().await;

    let response = send(
        app(&resources),
        get("/api/canvas/oauth/callback?code=abc&state=forged"),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
