// ABOUTME: Integration tests for LTI 1.3 OIDC login and id_token validation
// ABOUTME: Platform JWKS served by wiremock; state and nonce single use, claim checks and key caching
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use futures_util::future::join_all;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lti_launch::clock::{Clock, ManualClock};
use lti_launch::context::ServerResources;
use lti_launch::errors::{ErrorCode, Lti13ErrorKind};
use lti_launch::lti::{LaunchParams, OidcLoginRequest};
use lti_launch::models::{ApplicationInstance, LtiRegistration};

use common::{
    create_lti13_instance, id_token_claims, platform_jwks, platform_key, sign_id_token,
    state_and_nonce, test_resources, CLIENT_ID, DEPLOYMENT_ID, ISSUER, LMS_GUID, PLATFORM_KEY,
    PLATFORM_KID,
};

const LAUNCH_URL: &str = "https://lti.example.com/lti/1.3/launches";
const TOKEN_URL: &str = "https://platform.invalid/token";

async fn platform(expected_fetches: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(platform_jwks()))
        .expect(expected_fetches)
        .mount(&server)
        .await;
    server
}

fn login_request() -> OidcLoginRequest {
    OidcLoginRequest {
        iss: ISSUER.to_owned(),
        login_hint: "user-hint".to_owned(),
        client_id: Some(CLIENT_ID.to_owned()),
        lti_message_hint: Some("message-hint".to_owned()),
        lti_deployment_id: Some(DEPLOYMENT_ID.to_owned()),
        ..OidcLoginRequest::default()
    }
}

async fn register(
    resources: &ServerResources,
    server: &MockServer,
) -> (LtiRegistration, ApplicationInstance) {
    create_lti13_instance(resources, &format!("{}/jwks", server.uri()), TOKEN_URL).await
}

async fn login(resources: &ServerResources) -> (String, String) {
    let redirect = resources
        .oidc
        .initiate(&login_request(), LAUNCH_URL)
        .await
        .unwrap();
    state_and_nonce(&redirect)
}

#[tokio::test]
async fn test_oidc_login_redirects_to_platform() {
    let (resources, _) = test_resources().await;
    create_lti13_instance(&resources, "https://platform.invalid/jwks", TOKEN_URL).await;

    let redirect = resources
        .oidc
        .initiate(&login_request(), LAUNCH_URL)
        .await
        .unwrap();

    assert!(redirect
        .as_str()
        .starts_with("https://sso.canvaslms.com/api/lti/authorize_redirect?"));
    let pairs: Vec<(String, String)> = redirect.query_pairs().into_owned().collect();
    let value = |name: &str| {
        pairs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    assert_eq!(value("response_type"), Some("id_token"));
    assert_eq!(value("response_mode"), Some("form_post"));
    assert_eq!(value("scope"), Some("openid"));
    assert_eq!(value("prompt"), Some("none"));
    assert_eq!(value("client_id"), Some(CLIENT_ID));
    assert_eq!(value("redirect_uri"), Some(LAUNCH_URL));
    assert_eq!(value("login_hint"), Some("user-hint"));
    assert_eq!(value("lti_message_hint"), Some("message-hint"));
    assert!(value("state").is_some_and(|state| !state.is_empty()));
    assert!(value("nonce").is_some_and(|nonce| !nonce.is_empty()));
}

#[tokio::test]
async fn test_oidc_login_for_unknown_issuer_is_rejected() {
    let (resources, _) = test_resources().await;
    let request = OidcLoginRequest {
        iss: "https://unknown.example.com".to_owned(),
        login_hint: "hint".to_owned(),
        ..OidcLoginRequest::default()
    };

    let error = resources.oidc.initiate(&request, LAUNCH_URL).await.unwrap_err();

    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::UnknownRegistration));
}

#[tokio::test]
async fn test_valid_launch_maps_claims_to_tenant_and_params() {
    let server = platform(1).await;
    let (resources, clock) = test_resources().await;
    let (registration, instance) = register(&resources, &server).await;
    let (state, nonce) = login(&resources).await;
    let claims = id_token_claims(&nonce, clock.now());
    let token = sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID);

    let validated = resources.id_tokens.validate_launch(&token, &state).await.unwrap();

    assert_eq!(validated.registration.id, registration.id);
    assert_eq!(validated.instance.id, instance.id);
    let params = LaunchParams::from_lti13_claims(&validated.claims);
    assert_eq!(params.get("user_id"), Some("lti13-user-7"));
    assert_eq!(params.get("context_id"), Some("course-202"));
    assert_eq!(params.get("tool_consumer_instance_guid"), Some(LMS_GUID));
    assert_eq!(params.get("lti_version"), Some("1.3.0"));
    assert_eq!(params.get("lti_message_type"), Some("LtiResourceLinkRequest"));
    assert_eq!(params.get("deployment_id"), Some(DEPLOYMENT_ID));
}

#[tokio::test]
async fn test_state_and_nonce_are_single_use() {
    let server = platform(1).await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;
    let (state, nonce) = login(&resources).await;
    let claims = id_token_claims(&nonce, clock.now());
    let token = sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID);

    resources.id_tokens.validate_launch(&token, &state).await.unwrap();

    let replayed_state = resources.id_tokens.validate_launch(&token, &state).await.unwrap_err();
    assert_eq!(replayed_state.lti13_kind(), Some(Lti13ErrorKind::State));

    let replayed_nonce = resources.id_tokens.validate(&token).await.unwrap_err();
    assert_eq!(replayed_nonce.lti13_kind(), Some(Lti13ErrorKind::Nonce));
}

#[tokio::test]
async fn test_forged_token_does_not_burn_the_nonce() {
    let server = platform(1).await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;
    let (_, nonce) = login(&resources).await;
    let claims = id_token_claims(&nonce, clock.now());

    let impostor = platform_key(PLATFORM_KID);
    let forged = sign_id_token(&claims, &impostor, PLATFORM_KID);
    let error = resources.id_tokens.validate(&forged).await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::Lti13);
    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::Signature));

    let genuine = sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID);
    assert!(resources.id_tokens.validate(&genuine).await.is_ok());
}

#[tokio::test]
async fn test_claim_checks_name_the_failed_check() {
    let server = platform(1).await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;
    let (_, nonce) = login(&resources).await;
    let now = clock.now();

    let mut wrong_audience = id_token_claims(&nonce, now);
    wrong_audience["aud"] = json!("someone-else");
    wrong_audience
        .as_object_mut()
        .unwrap()
        .remove("azp");
    let error = resources
        .id_tokens
        .validate(&sign_id_token(&wrong_audience, &PLATFORM_KEY, PLATFORM_KID))
        .await
        .unwrap_err();
    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::UnknownRegistration));

    let mut expired = id_token_claims(&nonce, now - Duration::seconds(600));
    expired["exp"] = json!((now - Duration::seconds(61)).timestamp());
    let error = resources
        .id_tokens
        .validate(&sign_id_token(&expired, &PLATFORM_KEY, PLATFORM_KID))
        .await
        .unwrap_err();
    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::Expired));

    let mut future = id_token_claims(&nonce, now);
    future["iat"] = json!((now + Duration::seconds(120)).timestamp());
    let error = resources
        .id_tokens
        .validate(&sign_id_token(&future, &PLATFORM_KEY, PLATFORM_KID))
        .await
        .unwrap_err();
    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::IssuedInFuture));

    let mut other_deployment = id_token_claims(&nonce, now);
    other_deployment["https://purl.imsglobal.org/spec/lti/claim/deployment_id"] =
        json!("9:unknown");
    let error = resources
        .id_tokens
        .validate(&sign_id_token(&other_deployment, &PLATFORM_KEY, PLATFORM_KID))
        .await
        .unwrap_err();
    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::Deployment));
}

#[tokio::test]
async fn test_unknown_kid_is_rejected_without_refetch() {
    let server = platform(1).await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;
    let (_, nonce) = login(&resources).await;
    let claims = id_token_claims(&nonce, clock.now());

    resources
        .id_tokens
        .validate(&sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID))
        .await
        .unwrap();

    let (_, nonce) = login(&resources).await;
    let claims = id_token_claims(&nonce, clock.now());
    let error = resources
        .id_tokens
        .validate(&sign_id_token(&claims, &PLATFORM_KEY, "rotated-away"))
        .await
        .unwrap_err();

    assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::Jwks));
    assert_eq!(error.http_status(), 401);
}

async fn launch_at(resources: &ServerResources, clock: &ManualClock) {
    let (state, nonce) = login(resources).await;
    let claims = id_token_claims(&nonce, clock.now());
    resources
        .id_tokens
        .validate_launch(&sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID), &state)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_jwks_is_fetched_once_per_ttl() {
    let server = platform(2).await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;
    assert_eq!(resources.config.jwks_cache.ttl_secs, 600);

    launch_at(&resources, &clock).await;
    clock.advance(Duration::seconds(599));
    launch_at(&resources, &clock).await;
    clock.advance(Duration::seconds(2));
    launch_at(&resources, &clock).await;
}

#[tokio::test]
async fn test_cold_concurrent_launches_share_one_jwks_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(platform_jwks())
                .set_delay(StdDuration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;

    let mut tokens = Vec::new();
    for _ in 0..8 {
        let (state, nonce) = login(&resources).await;
        let claims = id_token_claims(&nonce, clock.now());
        tokens.push((sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID), state));
    }

    let results = join_all(
        tokens
            .iter()
            .map(|(token, state)| resources.id_tokens.validate_launch(token, state)),
    )
    .await;

    assert!(results.iter().all(Result::is_ok));
}

#[tokio::test]
async fn test_stale_jwks_is_served_during_platform_outage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(platform_jwks()))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;

    launch_at(&resources, &clock).await;
    clock.advance(Duration::seconds(resources.config.jwks_cache.ttl_secs + 5));
    launch_at(&resources, &clock).await;
}

#[tokio::test]
async fn test_unreachable_jwks_fails_as_jwks_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    register(&resources, &server).await;

    for _ in 0..2 {
        let (_, nonce) = login(&resources).await;
        let claims = id_token_claims(&nonce, clock.now());
        let error = resources
            .id_tokens
            .validate(&sign_id_token(&claims, &PLATFORM_KEY, PLATFORM_KID))
            .await
            .unwrap_err();
        assert_eq!(error.lti13_kind(), Some(Lti13ErrorKind::Jwks));
    }
}
