// ABOUTME: Integration tests for LTI Advantage client-credentials tokens
// ABOUTME: Client assertion verifies against the published keyset; tokens are cached per normalized scope set
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use futures_util::future::join_all;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::Algorithm;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lti_launch::context::ServerResources;
use lti_launch::crypto::jws_verify;
use lti_launch::errors::ErrorCode;

use common::{create_lti13_instance, now_ts, test_resources, CLIENT_ID};

const AGS_SCORE: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/score";
const AGS_LINEITEM: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/lineitem";

async fn with_signing_key(resources: &ServerResources) {
    resources
        .keyset
        .rotate(1, Duration::hours(24), Duration::hours(48))
        .await
        .unwrap();
}

async fn published_keys(resources: &ServerResources) -> JwkSet {
    let jwks = resources.keyset.jwks().await.unwrap();
    serde_json::from_value(serde_json::to_value(jwks).unwrap()).unwrap()
}

#[tokio::test]
async fn test_client_assertion_is_signed_by_published_key() {
    let (resources, clock) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) =
        create_lti13_instance(
            &resources,
            "https://platform.invalid/jwks",
            "https://platform.invalid/token",
        )
            .await;

    let assertion = resources.ltia.client_assertion(&registration).await.unwrap();
    let claims = jws_verify(&assertion, &published_keys(&resources).await, &[Algorithm::RS256])
        .unwrap();

    assert_eq!(claims["iss"], CLIENT_ID);
    assert_eq!(claims["sub"], CLIENT_ID);
    assert_eq!(claims["aud"], "https://platform.invalid/token");
    assert_eq!(claims["iat"], now_ts(&clock));
    assert!(claims["exp"].as_i64().unwrap() > now_ts(&clock));
    assert!(claims["jti"].as_str().is_some_and(|jti| !jti.is_empty()));
}

#[tokio::test]
async fn test_client_assertion_without_keys_fails() {
    let (resources, _) = test_resources().await;
    let (registration, _) =
        create_lti13_instance(
            &resources,
            "https://platform.invalid/jwks",
            "https://platform.invalid/token",
        )
            .await;

    let error = resources.ltia.client_assertion(&registration).await.unwrap_err();

    assert_eq!(error.code(), ErrorCode::Internal);
}

#[tokio::test]
async fn test_token_is_cached_per_scope_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_assertion_type="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ags-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) = create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .await;

    let first = resources
        .ltia
        .get_for(&registration, &[AGS_SCORE, AGS_LINEITEM])
        .await
        .unwrap();
    clock.advance(Duration::minutes(30));
    let second = resources
        .ltia
        .get_for(&registration, &[format!("{AGS_LINEITEM} {AGS_SCORE}")])
        .await
        .unwrap();

    assert_eq!(first, "ags-token");
    assert_eq!(second, "ags-token");
}

#[tokio::test]
async fn test_token_near_expiry_is_fetched_again() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ags-token",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&server)
        .await;
    let (resources, clock) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) = create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .await;

    resources.ltia.get_for(&registration, &[AGS_SCORE]).await.unwrap();
    clock.advance(Duration::seconds(3600 - 30));
    resources.ltia.get_for(&registration, &[AGS_SCORE]).await.unwrap();
}

#[tokio::test]
async fn test_platform_error_is_an_external_request_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "invalid_client"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (resources, _) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) = create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .await;

    let error = resources
        .ltia
        .get_for(&registration, &[AGS_SCORE])
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::ExternalRequest);
    assert_eq!(error.details.upstream_status, Some(401));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_token_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "ags-token",
                    "expires_in": 3600
                }))
                .set_delay(StdDuration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (resources, _) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) = create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .await;

    let (first, second) = tokio::join!(
        resources.ltia.get_for(&registration, &[AGS_SCORE]),
        resources.ltia.get_for(&registration, &[AGS_SCORE]),
    );

    assert_eq!(first.unwrap(), "ags-token");
    assert_eq!(second.unwrap(), "ags-token");
}

#[tokio::test]
async fn test_many_queued_callers_all_receive_the_fetched_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "access_token": "ags-token",
                    "expires_in": 3600
                }))
                .set_delay(StdDuration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let (resources, _) = test_resources().await;
    with_signing_key(&resources).await;
    let (registration, _) = create_lti13_instance(
        &resources,
        &format!("{}/jwks", server.uri()),
        &format!("{}/token", server.uri()),
    )
    .await;

    // more callers than the database pool has connections
    let tokens = join_all(
        (0..24).map(|_| resources.ltia.get_for(&registration, &[AGS_SCORE, AGS_LINEITEM])),
    )
    .await;

    assert!(tokens.into_iter().all(|token| token.unwrap() == "ags-token"));
}
