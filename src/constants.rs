// ABOUTME: Protocol constants for LTI 1.1, LTI 1.3 and the OAuth2 flows
// ABOUTME: Claim URIs, time windows, cookie names and default settings values
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Time windows and lifetimes
pub mod limits {
    /// Accepted distance between `oauth_timestamp` and now
    pub const OAUTH1_TIMESTAMP_WINDOW_SECS: i64 = 300;
    /// Allowed clock skew on `exp` / `iat` of LTI 1.3 id tokens
    pub const ID_TOKEN_LEEWAY_SECS: i64 = 60;
    /// Lifetime of a persisted OIDC nonce or state
    pub const OIDC_NONCE_TTL_SECS: i64 = 600;
    /// Lifetime of grant tokens issued to the annotation client
    pub const GRANT_TOKEN_TTL_SECS: i64 = 300;
    /// Lifetime of the JWT bearer assertion sent to LTI Advantage token endpoints
    pub const CLIENT_ASSERTION_TTL_SECS: i64 = 60;
    /// Lifetime of the OAuth2 authorization `state` parameter
    pub const OAUTH2_STATE_TTL_SECS: i64 = 600;
    /// Lifetime of the launch session
    pub const SESSION_TTL_SECS: i64 = 12 * 60 * 60;
    /// Default outbound HTTP timeout
    pub const HTTP_TIMEOUT_SECS: u64 = 10;
    /// Hard deadline for one OAuth2 refresh
    pub const OAUTH2_REFRESH_DEADLINE_SECS: u64 = 30;
    /// Maximum organization tree depth
    pub const MAX_ORGANIZATION_DEPTH: usize = 8;
    /// Display names longer than this are truncated
    pub const MAX_DISPLAY_NAME_CHARS: usize = 30;
    /// Length of the base32 local part of an `h_userid`
    pub const H_USERNAME_LEN: usize = 30;
    /// Period of the expired-nonce purge
    pub const NONCE_PURGE_INTERVAL_SECS: u64 = 5 * 60;
}

/// LTI 1.3 claim names
pub mod claims {
    /// Launch message type
    pub const MESSAGE_TYPE: &str = "https://purl.imsglobal.org/spec/lti/claim/message_type";
    /// LTI version
    pub const VERSION: &str = "https://purl.imsglobal.org/spec/lti/claim/version";
    /// Deployment id
    pub const DEPLOYMENT_ID: &str = "https://purl.imsglobal.org/spec/lti/claim/deployment_id";
    /// Role URIs
    pub const ROLES: &str = "https://purl.imsglobal.org/spec/lti/claim/roles";
    /// Course context
    pub const CONTEXT: &str = "https://purl.imsglobal.org/spec/lti/claim/context";
    /// Resource link
    pub const RESOURCE_LINK: &str = "https://purl.imsglobal.org/spec/lti/claim/resource_link";
    /// Platform product and instance GUID
    pub const TOOL_PLATFORM: &str = "https://purl.imsglobal.org/spec/lti/claim/tool_platform";
    /// Custom parameters
    pub const CUSTOM: &str = "https://purl.imsglobal.org/spec/lti/claim/custom";
    /// Presentation hints and return URL
    pub const LAUNCH_PRESENTATION: &str =
        "https://purl.imsglobal.org/spec/lti/claim/launch_presentation";
    /// Launch target
    pub const TARGET_LINK_URI: &str = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri";
}

/// OAuth 1.0a parameter names
pub mod oauth1 {
    /// Consumer key
    pub const CONSUMER_KEY: &str = "oauth_consumer_key";
    /// Signature
    pub const SIGNATURE: &str = "oauth_signature";
    /// Signature method
    pub const SIGNATURE_METHOD: &str = "oauth_signature_method";
    /// Timestamp in seconds
    pub const TIMESTAMP: &str = "oauth_timestamp";
    /// Per-request nonce
    pub const NONCE: &str = "oauth_nonce";
    /// The only signature method accepted
    pub const HMAC_SHA1: &str = "HMAC-SHA1";
}

/// OAuth2 grant values
pub mod oauth2 {
    /// `grant_type` for the refresh token grant
    pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
    /// `grant_type` for the authorization code grant
    pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
    /// `grant_type` for the client credentials grant
    pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
    /// `client_assertion_type` for a signed JWT assertion
    pub const CLIENT_ASSERTION_TYPE_JWT_BEARER: &str =
        "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
    /// Error string an OAuth2 server returns for a revoked refresh token
    pub const INVALID_GRANT: &str = "invalid_grant";
}

/// Nonce store scopes
pub mod nonce_scopes {
    /// Prefix for LTI 1.1 nonces, followed by the consumer key
    pub const LTI11_PREFIX: &str = "lti11:";
    /// Prefix for LTI 1.3 nonces, followed by the registration id
    pub const LTI13_PREFIX: &str = "lti13:";
    /// OIDC `state` values
    pub const OIDC_STATE: &str = "oidc_state";
    /// OAuth2 authorization `state` ids
    pub const OAUTH2_STATE: &str = "oauth2_state";
}

/// Cookie names
pub mod cookies {
    /// Launch session
    pub const SESSION: &str = "session";
}

/// Settings group names stored in `application_instances.settings`
pub mod settings_groups {
    /// Canvas
    pub const CANVAS: &str = "canvas";
    /// Canvas Studio
    pub const CANVAS_STUDIO: &str = "canvas_studio";
    /// Blackboard
    pub const BLACKBOARD: &str = "blackboard";
    /// D2L Brightspace
    pub const D2L: &str = "desire2learn";
}

/// Default key rotation policy
pub mod key_rotation {
    /// Non-expired keys kept published
    pub const TARGET_KEYS: usize = 3;
    /// Age at which a key stops signing
    pub const MAX_AGE_HOURS: i64 = 7 * 24;
    /// Age at which an expired key is deleted
    pub const MAX_EXPIRED_AGE_HOURS: i64 = 14 * 24;
    /// Rotation period
    pub const INTERVAL_SECS: u64 = 60 * 60;
    /// Modulus size of new keys
    pub const RSA_KEY_BITS: usize = 2048;
}
