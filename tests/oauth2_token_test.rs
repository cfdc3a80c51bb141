// ABOUTME: Integration tests for per-user LMS OAuth2 tokens against a mocked Canvas token endpoint
// ABOUTME: Code exchange, skip window, single-flight refresh, invalid_grant handling and the state codec
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
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lti_launch::clock::Clock;
use lti_launch::context::ServerResources;
use lti_launch::errors::ErrorCode;
use lti_launch::database_plugins::DatabaseProvider;
use lti_launch::models::{ApplicationInstance, LockType, LtiVersion, OAuth2Service};
use lti_launch::oauth2_tokens::{ClientAuth, OAuth2Endpoints, TokenOwner};
use lti_launch::session::SessionClaims;

use common::{create_canvas_instance, create_user, test_resources};

const TOKEN_PATH: &str = "/login/oauth2/token";

async fn canvas_instance(resources: &ServerResources, server: &MockServer) -> ApplicationInstance {
    create_canvas_instance(resources, &server.uri()).await
}

fn endpoints(resources: &ServerResources, instance: &ApplicationInstance) -> OAuth2Endpoints {
    OAuth2Endpoints::resolve(
        OAuth2Service::Canvas,
        instance,
        &resources.tenants.settings(instance),
        resources.tenants.cipher(),
        &resources.public_base().unwrap(),
    )
    .unwrap()
}

async fn authorized(
    resources: &ServerResources,
    server: &MockServer,
) -> (TokenOwner, OAuth2Endpoints) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(server)
        .await;

    let instance = canvas_instance(resources, server).await;
    let user = create_user(resources, &instance).await;
    let owner = TokenOwner {
        application_instance_id: instance.id,
        user_id: user.id,
    };
    let endpoints = endpoints(resources, &instance);
    let access_token = resources
        .oauth2_tokens
        .get_access_token(owner, &endpoints, "auth-code")
        .await
        .unwrap();
    assert_eq!(access_token, "access-1");
    (owner, endpoints)
}

#[tokio::test]
async fn test_endpoints_resolve_from_canvas_settings() {
    let server = MockServer::start().await;
    let (resources, _) = test_resources().await;
    let instance = canvas_instance(&resources, &server).await;

    let endpoints = endpoints(&resources, &instance);

    assert_eq!(endpoints.token_url.path(), TOKEN_PATH);
    assert_eq!(endpoints.authorize_url.path(), "/login/oauth2/auth");
    assert_eq!(endpoints.client_id, "10000000000042");
    assert_eq!(endpoints.client_secret.as_str(), "dev-secret");
    assert_eq!(endpoints.auth, ClientAuth::Body);
    assert_eq!(
        endpoints.redirect_uri,
        "https://lti.example.com/api/canvas/oauth/callback"
    );
}

#[tokio::test]
async fn test_missing_developer_key_is_a_serializable_error() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = common::create_lti11_instance(&resources).await;

    let error = OAuth2Endpoints::resolve(
        OAuth2Service::Canvas,
        &instance,
        &resources.tenants.settings(&instance),
        resources.tenants.cipher(),
        &resources.public_base().unwrap(),
    )
    .unwrap_err();

    assert_eq!(error.code(), ErrorCode::Serializable);
    assert_eq!(
        error.details.problem_code.as_deref(),
        Some("oauth2_client_not_configured")
    );
}

#[tokio::test]
async fn test_authorization_code_exchange_stores_token() {
    let server = MockServer::start().await;
    let (resources, _) = test_resources().await;
    let (owner, _) = authorized(&resources, &server).await;

    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();

    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(stored.expires_in, Some(3600));
}

#[tokio::test]
async fn test_missing_token_requires_authorization() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = common::create_lti11_instance(&resources).await;
    let user = create_user(&resources, &instance).await;

    let error = resources
        .oauth2_tokens
        .get(
            TokenOwner {
                application_instance_id: instance.id,
                user_id: user.id,
            },
            OAuth2Service::Canvas,
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::OAuth2Token);
    assert!(!error.details.refreshable);
}

#[tokio::test]
async fn test_fresh_token_is_not_refreshed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "never-issued"
        })))
        .expect(0)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;

    clock.advance(Duration::seconds(29));
    let token = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, true)
        .await
        .unwrap();

    assert_eq!(token, "access-1");
}

#[tokio::test]
async fn test_refresh_replaces_access_token_and_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .and(body_string_contains("client_id=10000000000042"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;

    clock.advance(Duration::seconds(60));
    let token = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, true)
        .await
        .unwrap();

    assert_eq!(token, "access-2");
    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(stored.received_at, clock.now());
}

#[tokio::test]
async fn test_concurrent_refreshes_make_one_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "access-2",
                    "refresh_token": "refresh-2",
                    "expires_in": 3600
                }))
                .set_delay(StdDuration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;
    clock.advance(Duration::seconds(60));

    let outcomes = join_all((0..10).map(|_| {
        resources
            .oauth2_tokens
            .refresh_access_token(owner, &endpoints, true)
    }))
    .await;

    let busy = outcomes
        .iter()
        .filter(|outcome| {
            outcome
                .as_ref()
                .is_err_and(|e| e.code() == ErrorCode::ConcurrentTokenRefresh)
        })
        .count();
    let refreshed = outcomes
        .iter()
        .filter(|outcome| outcome.as_ref().is_ok_and(|token| token == "access-2"))
        .count();
    assert!(busy >= 1);
    assert!(refreshed >= 1);
    assert_eq!(busy + refreshed, 10);

    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_unprevented_refresh_proceeds_while_the_lock_is_held() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;
    clock.advance(Duration::seconds(60));
    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();
    let held = resources
        .database
        .try_advisory_lock(LockType::OAuth2TokenRefresh, stored.id)
        .await
        .unwrap()
        .expect("lock is free");

    let error = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, true)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::ConcurrentTokenRefresh);

    let access_token = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, false)
        .await
        .unwrap();
    assert_eq!(access_token, "access-2");
    held.release().await.unwrap();

    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.access_token, "access-2");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_invalid_grant_requires_reauthorization() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;
    clock.advance(Duration::seconds(60));

    let error = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, true)
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::OAuth2Token);
    assert!(!error.details.refreshable);
    assert_eq!(error.details.service.as_deref(), Some("canvas"));
    let stored = resources
        .oauth2_tokens
        .get(owner, OAuth2Service::Canvas)
        .await
        .unwrap();
    assert_eq!(stored.access_token, "access-1");
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_upstream_failure_is_an_external_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    let (owner, endpoints) = authorized(&resources, &server).await;
    clock.advance(Duration::seconds(60));

    let error = resources
        .oauth2_tokens
        .refresh_access_token(owner, &endpoints, true)
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::ExternalRequest);
    assert_eq!(error.details.upstream_status, Some(500));
}

fn session_for(user_id: i64, application_instance_id: i64) -> SessionClaims {
    SessionClaims {
        user_id,
        application_instance_id,
        h_userid: format!("acct:user{user_id}@lms.hypothes.is"),
        lti_version: LtiVersion::V11,
        instructor: true,
        iat: 0,
        exp: 0,
    }
}

#[tokio::test]
async fn test_state_is_bound_to_service_and_expires() {
    let (resources, clock) = test_resources().await;
    let session = session_for(7, 3);
    let state = resources
        .oauth2_state
        .encode(&session, OAuth2Service::Canvas)
        .await
        .unwrap();

    let claims = resources
        .oauth2_state
        .decode(&state, OAuth2Service::Canvas)
        .unwrap();
    assert_eq!(claims.user_id, 7);
    assert_eq!(claims.application_instance_id, 3);

    let error = resources
        .oauth2_state
        .decode(&state, OAuth2Service::Blackboard)
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidInput);

    let mut forged = state.clone();
    forged.push('x');
    let error = resources
        .oauth2_state
        .decode(&forged, OAuth2Service::Canvas)
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidInput);

    clock.advance(Duration::minutes(11));
    let error = resources
        .oauth2_state
        .redeem(&state, OAuth2Service::Canvas, &session)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_state_is_redeemed_once() {
    let (resources, _) = test_resources().await;
    let session = session_for(7, 3);
    let state = resources
        .oauth2_state
        .encode(&session, OAuth2Service::Canvas)
        .await
        .unwrap();

    let claims = resources
        .oauth2_state
        .redeem(&state, OAuth2Service::Canvas, &session)
        .await
        .unwrap();
    assert_eq!(claims.user_id, 7);

    let error = resources
        .oauth2_state
        .redeem(&state, OAuth2Service::Canvas, &session)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_state_from_another_session_is_rejected() {
    let (resources, _) = test_resources().await;
    let requester = session_for(7, 3);
    let state = resources
        .oauth2_state
        .encode(&requester, OAuth2Service::Canvas)
        .await
        .unwrap();

    for other in [session_for(8, 3), session_for(7, 4)] {
        let error = resources
            .oauth2_state
            .redeem(&state, OAuth2Service::Canvas, &other)
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidInput);
    }

    // a rejected attempt does not burn the state for its owner
    resources
        .oauth2_state
        .redeem(&state, OAuth2Service::Canvas, &requester)
        .await
        .unwrap();
}
