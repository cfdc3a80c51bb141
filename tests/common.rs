// ABOUTME: Shared fixtures for integration tests
// ABOUTME: In-memory resources on a manual clock, tenant provisioning, LTI 1.1 signing and a platform RSA key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::similar_names
)]
//! Shared test utilities for `lti_launch`

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use lti_launch::clock::{Clock, ManualClock, SharedClock};
use lti_launch::config::environment::ServerConfig;
use lti_launch::context::ServerResources;
use lti_launch::crypto::{jws_sign, JsonWebKey, RsaKeyMaterial, SigningKey};
use lti_launch::database_plugins::factory::Database;
use lti_launch::database_plugins::DatabaseProvider;
use lti_launch::logging::{self, LogFormat};
use lti_launch::lti::oauth1::{sign_hmac_sha1, signature_base_string};
use lti_launch::models::{
    ApplicationInstance, LtiRegistration, NewApplicationInstance, NewLtiRegistration, User,
    UserUpsert,
};
use lti_launch::tenants::generate_lti11_credentials;

pub const AUTHORITY: &str = "lms.hypothes.is";
pub const PUBLIC_URL: &str = "https://lti.example.com";
pub const JWT_CLIENT_ID: &str = "test-h-client";
pub const JWT_CLIENT_SECRET: &str = "test-h-client-secret";
pub const SESSION_SECRET: &str = "test-session-secret";
pub const LMS_GUID: &str = "lms-guid-0001.example.edu";
pub const ISSUER: &str = "https://canvas.instructure.com";
pub const CLIENT_ID: &str = "10000000000001";
pub const DEPLOYMENT_ID: &str = "1:abcdef";
pub const PLATFORM_KID: &str = "platform-key-1";

/// 2025-03-01T12:00:00Z
pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_740_830_400, 0).unwrap()
}

/// Current Unix time of `clock`
pub fn now_ts(clock: &ManualClock) -> i64 {
    clock.now().timestamp()
}

pub fn test_config() -> ServerConfig {
    test_config_with(&[])
}

/// [`test_config`] with some variables replaced
pub fn test_config_with(overrides: &[(&'static str, &'static str)]) -> ServerConfig {
    let mut vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "sqlite::memory:"),
        ("PUBLIC_URL", PUBLIC_URL),
        ("H_AUTHORITY", AUTHORITY),
        ("H_API_URL_PUBLIC", "https://hypothes.is/api/"),
        ("H_JWT_CLIENT_ID", JWT_CLIENT_ID),
        ("H_JWT_CLIENT_SECRET", JWT_CLIENT_SECRET),
        ("AES_SECRET", "0123456789abcdef0123456789abcdef"),
        ("SESSION_COOKIE_SECRET", SESSION_SECRET),
        ("OAUTH2_STATE_SECRET", "test-oauth2-state-secret"),
        ("RPC_ALLOWED_ORIGINS", "https://hypothes.is"),
        ("KEY_ROTATION_TARGET", "2"),
    ]);
    vars.extend(overrides.iter().copied());
    ServerConfig::from_lookup(|key| vars.get(key).map(|value| (*value).to_owned())).unwrap()
}

/// Resources over a fresh in-memory database and a clock frozen at [`start_time`]
pub async fn test_resources() -> (ServerResources, Arc<ManualClock>) {
    test_resources_with(test_config()).await
}

/// Quiet test logging; `RUST_LOG` raises it when debugging a test
pub fn init_test_logging() {
    // every test binary calls this; only the first install succeeds
    let _ = logging::init(LogFormat::Text, "warn");
}

pub async fn test_resources_with(config: ServerConfig) -> (ServerResources, Arc<ManualClock>) {
    init_test_logging();
    let database = Database::new("sqlite::memory:").await.unwrap();
    let clock = Arc::new(ManualClock::new(start_time()));
    let shared: SharedClock = clock.clone();
    let resources =
        ServerResources::new(config, database, shared, reqwest::Client::new()).unwrap();
    (resources, clock)
}

// ═══════════════════════════════════════════════════════════════
// Tenants
// ═══════════════════════════════════════════════════════════════

/// LTI 1.1 tenant with freshly generated credentials: `(instance, key, secret)`
pub async fn create_lti11_instance(
    resources: &ServerResources,
) -> (ApplicationInstance, String, String) {
    let (consumer_key, shared_secret) = generate_lti11_credentials();
    let instance = resources
        .tenants
        .create_application_instance(&NewApplicationInstance {
            consumer_key: Some(consumer_key.clone()),
            shared_secret: Some(shared_secret.clone()),
            lms_url: Some("https://lms.example.edu".to_owned()),
            settings: json!({}),
            ..NewApplicationInstance::default()
        })
        .await
        .unwrap();
    (instance, consumer_key, shared_secret)
}

/// LTI 1.3 registration plus a tenant on [`DEPLOYMENT_ID`]
pub async fn create_lti13_instance(
    resources: &ServerResources,
    key_set_url: &str,
    token_url: &str,
) -> (LtiRegistration, ApplicationInstance) {
    let registration = resources
        .tenants
        .create_registration(&NewLtiRegistration {
            issuer: ISSUER.to_owned(),
            client_id: CLIENT_ID.to_owned(),
            auth_login_url: "https://sso.canvaslms.com/api/lti/authorize_redirect".to_owned(),
            key_set_url: key_set_url.to_owned(),
            token_url: token_url.to_owned(),
        })
        .await
        .unwrap();
    let instance = resources
        .tenants
        .create_application_instance(&NewApplicationInstance {
            lti_registration_id: Some(registration.id),
            deployment_id: Some(DEPLOYMENT_ID.to_owned()),
            lms_url: Some("https://lms.example.edu".to_owned()),
            settings: json!({}),
            ..NewApplicationInstance::default()
        })
        .await
        .unwrap();
    (registration, instance)
}

/// Canvas tenant on `lms_url` with a developer key for OAuth2
pub async fn create_canvas_instance(
    resources: &ServerResources,
    lms_url: &str,
) -> ApplicationInstance {
    let instance = resources
        .tenants
        .create_application_instance(&NewApplicationInstance {
            consumer_key: Some(format!("Hypothesis-canvas-{}", Uuid::new_v4().simple())),
            shared_secret: Some("canvas-shared-secret".to_owned()),
            lms_url: Some(lms_url.to_owned()),
            settings: json!({}),
            ..NewApplicationInstance::default()
        })
        .await
        .unwrap();

    let mut settings = resources.tenants.settings(&instance);
    settings.set("canvas", "developer_key", "10000000000042");
    settings
        .set_secret(resources.tenants.cipher(), "canvas", "developer_secret", "dev-secret")
        .unwrap();
    assert!(resources
        .tenants
        .save_settings(instance.id, &mut settings)
        .await
        .unwrap());
    resources.tenants.require(instance.id).await.unwrap()
}

pub async fn create_user(resources: &ServerResources, instance: &ApplicationInstance) -> User {
    resources
        .database
        .upsert_user(
            &UserUpsert {
                application_instance_id: instance.id,
                lti_user_id: "lms-user-42".to_owned(),
                h_userid: format!("acct:testuser@{AUTHORITY}"),
                roles: "Instructor".to_owned(),
                email: None,
                display_name: Some("Test User".to_owned()),
            },
            start_time(),
        )
        .await
        .unwrap()
}

// ═══════════════════════════════════════════════════════════════
// LTI 1.1
// ═══════════════════════════════════════════════════════════════

/// URL the LMS signs for launches against [`PUBLIC_URL`]
pub fn lti11_launch_url() -> Url {
    Url::parse(&format!("{PUBLIC_URL}/lti_launches")).unwrap()
}

/// Minimal valid basic launch from an instructor
pub fn lti11_launch_params() -> Vec<(String, String)> {
    [
        ("lti_message_type", "basic-lti-launch-request"),
        ("lti_version", "LTI-1p0"),
        ("resource_link_id", "link-1"),
        ("user_id", "lms-user-42"),
        ("roles", "Instructor"),
        ("context_id", "course-101"),
        ("context_title", "Annotating Texts"),
        ("lis_person_name_full", "Ada Lovelace"),
        ("tool_consumer_instance_guid", LMS_GUID),
        ("tool_consumer_info_product_family_code", "canvas"),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_owned(), value.to_owned()))
    .collect()
}

/// Add OAuth 1.0a fields and an HMAC-SHA1 signature to `params`
pub fn sign_lti11(
    url: &Url,
    mut params: Vec<(String, String)>,
    consumer_key: &str,
    shared_secret: &str,
    timestamp: i64,
    nonce: &str,
) -> Vec<(String, String)> {
    params.retain(|(key, _)| key != "oauth_signature");
    for (key, value) in [
        ("oauth_consumer_key", consumer_key.to_owned()),
        ("oauth_signature_method", "HMAC-SHA1".to_owned()),
        ("oauth_timestamp", timestamp.to_string()),
        ("oauth_nonce", nonce.to_owned()),
        ("oauth_version", "1.0".to_owned()),
        ("oauth_callback", "about:blank".to_owned()),
    ] {
        params.push((key.to_owned(), value));
    }
    let base_string = signature_base_string("POST", url, &params);
    let signature = sign_hmac_sha1(&base_string, shared_secret, "");
    params.push(("oauth_signature".to_owned(), signature));
    params
}

pub fn random_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn form_body(params: &[(String, String)]) -> String {
    serde_urlencoded::to_string(params).unwrap()
}

// ═══════════════════════════════════════════════════════════════
// LTI 1.3 platform
// ═══════════════════════════════════════════════════════════════

/// Signing key of a fake LMS platform, generated once per test binary
pub struct PlatformKey {
    pub pem: String,
    pub jwk: JsonWebKey,
}

pub static PLATFORM_KEY: LazyLock<PlatformKey> = LazyLock::new(|| platform_key(PLATFORM_KID));

pub fn platform_key(kid: &str) -> PlatformKey {
    let material = RsaKeyMaterial::generate(2048).unwrap();
    PlatformKey {
        pem: material.private_key_pem().unwrap().to_string(),
        jwk: material.to_jwk(kid),
    }
}

pub fn platform_jwks() -> Value {
    json!({ "keys": [PLATFORM_KEY.jwk] })
}

/// Launch claims as a platform would send them for [`DEPLOYMENT_ID`]
pub fn id_token_claims(nonce: &str, now: DateTime<Utc>) -> Value {
    json!({
        "iss": ISSUER,
        "aud": CLIENT_ID,
        "azp": CLIENT_ID,
        "sub": "lti13-user-7",
        "iat": now.timestamp(),
        "exp": now.timestamp() + 300,
        "nonce": nonce,
        "name": "Grace Hopper",
        "email": "grace@example.edu",
        "https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
        "https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
        "https://purl.imsglobal.org/spec/lti/claim/deployment_id": DEPLOYMENT_ID,
        "https://purl.imsglobal.org/spec/lti/claim/roles": [
            "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner"
        ],
        "https://purl.imsglobal.org/spec/lti/claim/context": {
            "id": "course-202",
            "title": "Reading Seminar"
        },
        "https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "link-9" },
        "https://purl.imsglobal.org/spec/lti/claim/tool_platform": {
            "guid": LMS_GUID,
            "product_family_code": "canvas"
        },
        "https://purl.imsglobal.org/spec/lti/claim/launch_presentation": {
            "return_url": "https://lms.example.edu/courses/202"
        }
    })
}

pub fn sign_id_token(claims: &Value, key: &PlatformKey, kid: &str) -> String {
    jws_sign(claims, &SigningKey::RsaPem(&key.pem), Some(kid)).unwrap()
}

/// `state` and `nonce` from an OIDC authorization redirect
pub fn state_and_nonce(redirect: &Url) -> (String, String) {
    let pairs: HashMap<String, String> = redirect.query_pairs().into_owned().collect();
    (pairs["state"].clone(), pairs["nonce"].clone())
}
