// ABOUTME: Integration tests for launch resolution, identity derivation and grant tokens
// ABOUTME: Required fields, GUID binding, organization gate, deterministic h_userid and token lifetime
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use chrono::Duration;

use lti_launch::errors::ErrorCode;
use lti_launch::identity::{display_name, h_userid, h_username, ANONYMOUS};
use lti_launch::lti::{LaunchParams, ProductFamily};
use lti_launch::models::{LtiVersion, NewOrganization};
use lti_launch::tenants::generate_organization_public_id;

use common::{create_lti11_instance, lti11_launch_params, test_resources, AUTHORITY, LMS_GUID};

fn params_without(field: &str) -> LaunchParams {
    LaunchParams::from_pairs(
        lti11_launch_params()
            .into_iter()
            .filter(|(key, _)| key != field),
    )
}

#[tokio::test]
async fn test_resolve_builds_context_and_records_guid() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = create_lti11_instance(&resources).await;

    let context = resources
        .launches
        .resolve(
            instance.clone(),
            LtiVersion::V11,
            LaunchParams::from_pairs(lti11_launch_params()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(context.context_id, "course-101");
    assert_eq!(context.context_title.as_deref(), Some("Annotating Texts"));
    assert_eq!(context.product_family, ProductFamily::Canvas);
    assert!(context.user.is_instructor);
    assert_eq!(context.user.display_name, "Ada Lovelace");
    assert_eq!(context.guid(), Some(LMS_GUID));

    let stored = resources.tenants.require(instance.id).await.unwrap();
    assert_eq!(stored.tool_consumer_instance_guid.as_deref(), Some(LMS_GUID));
    assert!(stored.last_launched.is_some());
}

#[tokio::test]
async fn test_missing_required_fields() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = create_lti11_instance(&resources).await;

    for field in ["context_id", "lti_version", "lti_message_type"] {
        let error = resources
            .launches
            .resolve(instance.clone(), LtiVersion::V11, params_without(field), None)
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::MissingLaunchParam, "{field}");
        assert_eq!(error.http_status(), 422);
        assert_eq!(error.details.field.as_deref(), Some(field));
    }

    let error = resources
        .launches
        .resolve(instance, LtiVersion::V11, params_without("user_id"), None)
        .await
        .unwrap_err();
    assert_eq!(error.code(), ErrorCode::LaunchForbidden);
}

#[tokio::test]
async fn test_launch_from_a_different_lms_is_rejected() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = create_lti11_instance(&resources).await;
    resources
        .launches
        .resolve(
            instance.clone(),
            LtiVersion::V11,
            LaunchParams::from_pairs(lti11_launch_params()),
            None,
        )
        .await
        .unwrap();

    let mut foreign = LaunchParams::from_pairs(lti11_launch_params());
    foreign.insert("tool_consumer_instance_guid", "another-lms.example.org");
    let error = resources
        .launches
        .resolve(instance, LtiVersion::V11, foreign, None)
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::TenantMismatch);
    assert_eq!(error.http_status(), 403);
}

#[tokio::test]
async fn test_first_launches_racing_for_the_guid_bind_one_lms() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = create_lti11_instance(&resources).await;
    let mut other = LaunchParams::from_pairs(lti11_launch_params());
    other.insert("tool_consumer_instance_guid", "another-lms.example.org");

    let (first, second) = tokio::join!(
        resources.launches.resolve(
            instance.clone(),
            LtiVersion::V11,
            LaunchParams::from_pairs(lti11_launch_params()),
            None,
        ),
        resources
            .launches
            .resolve(instance.clone(), LtiVersion::V11, other, None),
    );

    let (winner, loser) = match (first, second) {
        (Ok(context), Err(error)) | (Err(error), Ok(context)) => (context, error),
        (first, second) => panic!("expected exactly one bound launch: {first:?} / {second:?}"),
    };
    assert_eq!(loser.code(), ErrorCode::TenantMismatch);
    let stored = resources.tenants.require(instance.id).await.unwrap();
    assert_eq!(stored.tool_consumer_instance_guid.as_deref(), winner.guid());
}

#[tokio::test]
async fn test_disabled_ancestor_organization_blocks_launch() {
    let (resources, _) = test_resources().await;
    let parent = resources
        .tenants
        .create_organization(&NewOrganization {
            public_id: generate_organization_public_id(AUTHORITY),
            name: Some("District".to_owned()),
            parent_id: None,
            enabled: true,
        })
        .await
        .unwrap();
    let child = resources
        .tenants
        .create_organization(&NewOrganization {
            public_id: generate_organization_public_id(AUTHORITY),
            name: Some("School".to_owned()),
            parent_id: Some(parent.id),
            enabled: true,
        })
        .await
        .unwrap();
    let (instance, _, _) = create_lti11_instance(&resources).await;
    let mut instance = instance;
    instance.organization_id = Some(child.id);

    resources
        .tenants
        .set_organization_enabled(parent.id, false)
        .await
        .unwrap();
    let error = resources
        .launches
        .resolve(
            instance,
            LtiVersion::V11,
            LaunchParams::from_pairs(lti11_launch_params()),
            None,
        )
        .await
        .unwrap_err();

    assert_eq!(error.code(), ErrorCode::LaunchForbidden);
}

#[test]
fn test_product_family_precedence() {
    let mut params = LaunchParams::new();
    params.insert("custom_canvas_course_id", "12");
    assert_eq!(ProductFamily::detect(&params, None), ProductFamily::Canvas);
    assert_eq!(
        ProductFamily::detect(&params, Some("BlackboardLearn")),
        ProductFamily::BlackboardLearn
    );

    params.insert("tool_consumer_info_product_family_code", "moodle");
    assert_eq!(
        ProductFamily::detect(&params, Some("BlackboardLearn")),
        ProductFamily::Moodle
    );
    assert_eq!(
        ProductFamily::detect(&LaunchParams::new(), Some("  ")),
        ProductFamily::Unknown
    );
}

#[test]
fn test_h_userid_is_deterministic_and_well_formed() {
    let first = h_userid(LMS_GUID, "lms-user-42", AUTHORITY);
    let second = h_userid(LMS_GUID, "lms-user-42", AUTHORITY);
    assert_eq!(first, second);

    let username = h_username(LMS_GUID, "lms-user-42");
    assert_eq!(username.len(), 30);
    assert!(username
        .chars()
        .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
    assert_eq!(first, format!("acct:{username}@{AUTHORITY}"));

    assert_ne!(first, h_userid("other-lms", "lms-user-42", AUTHORITY));
    assert_ne!(first, h_userid(LMS_GUID, "lms-user-43", AUTHORITY));
}

#[test]
fn test_display_name_normalization() {
    assert_eq!(display_name(Some("  Ada Lovelace "), None, None), "Ada Lovelace");
    assert_eq!(display_name(None, Some("Ada"), Some("Lovelace")), "Ada Lovelace");
    assert_eq!(display_name(Some(""), None, Some("Lovelace")), "Lovelace");
    assert_eq!(display_name(None, None, None), ANONYMOUS);

    let long = display_name(Some("Augusta Ada King, Countess of Lovelace"), None, None);
    assert_eq!(long.chars().count(), 30);
    assert!(long.ends_with('…'));
}

#[tokio::test]
async fn test_identity_upsert_is_idempotent() {
    let (resources, _) = test_resources().await;
    let (instance, _, _) = create_lti11_instance(&resources).await;
    let context = resources
        .launches
        .resolve(
            instance,
            LtiVersion::V11,
            LaunchParams::from_pairs(lti11_launch_params()),
            None,
        )
        .await
        .unwrap();

    let first = resources.identity.upsert_for_launch(&context).await.unwrap();
    let second = resources.identity.upsert_for_launch(&context).await.unwrap();

    assert_eq!(first.user.id, second.user.id);
    assert_eq!(first.course.id, second.course.id);
    assert_eq!(first.h_userid, h_userid(LMS_GUID, "lms-user-42", AUTHORITY));
    assert!(first.group_id.starts_with("group:"));
    assert!(first.group_id.ends_with(&format!("@{AUTHORITY}")));
}

#[tokio::test]
async fn test_identity_needs_an_lms_guid() {
    let (resources, _) = test_resources().await;

    for _ in 0..2 {
        let (instance, _, _) = create_lti11_instance(&resources).await;
        let context = resources
            .launches
            .resolve(
                instance,
                LtiVersion::V11,
                params_without("tool_consumer_instance_guid"),
                None,
            )
            .await
            .unwrap();
        assert_eq!(context.guid(), None);

        let error = resources
            .identity
            .upsert_for_launch(&context)
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::MissingLaunchParam);
        assert!(error.message.contains("tool_consumer_instance_guid"));
    }
}

#[tokio::test]
async fn test_grant_token_claims_and_lifetime() {
    let (resources, clock) = test_resources().await;
    let h_userid = h_userid(LMS_GUID, "lms-user-42", AUTHORITY);

    let token = resources.grant_tokens.issue(&h_userid).unwrap();
    let claims = resources.grant_tokens.verify(&token).unwrap();

    assert_eq!(claims.sub, h_userid);
    assert_eq!(claims.aud, "hypothes.is");
    assert_eq!(claims.iss, common::JWT_CLIENT_ID);
    assert_eq!(claims.exp - claims.iat, 300);
    assert_eq!(claims.nbf, claims.iat);

    clock.advance(Duration::seconds(301));
    let error = resources.grant_tokens.verify(&token).unwrap_err();
    assert_eq!(error.code(), ErrorCode::Signature);
}
