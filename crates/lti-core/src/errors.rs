// ABOUTME: Unified error vocabulary for the LTI launch core
// ABOUTME: ErrorCode taxonomy, AppError with structured details, and HTTP status mapping
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Error handling
//!
//! Every fallible operation in the workspace returns [`AppResult`]. Protocol
//! failures (bad signature, missing launch parameter, revoked refresh token)
//! and infrastructure failures (database, upstream HTTP) share one type but
//! are told apart by [`ErrorCode`], which also fixes the HTTP status.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across the workspace
pub type AppResult<T> = Result<T, AppError>;

/// Machine-readable error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// LTI 1.1 OAuth signature, timestamp or nonce failure
    LtiOAuth,
    /// LTI 1.3 OIDC or `id_token` validation failure
    Lti13,
    /// Launch GUID differs from the one recorded for the tenant
    TenantMismatch,
    /// A required launch parameter is absent
    MissingLaunchParam,
    /// Launch refused (missing user, disabled organization)
    LaunchForbidden,
    /// Stored OAuth2 token missing, rejected or revoked; user must re-authorize
    OAuth2Token,
    /// Another worker holds the refresh lock for this token
    ConcurrentTokenRefresh,
    /// Upstream HTTP failure that is not an authorization problem
    ExternalRequest,
    /// LMS-specific failure rendered as a machine-readable problem
    Serializable,
    /// Malformed ciphertext, key or encoding
    Crypto,
    /// Signature verification failed
    Signature,
    /// Request payload is malformed
    InvalidInput,
    /// Requested resource does not exist
    NotFound,
    /// Database operation failed
    Database,
    /// Configuration is missing or invalid
    Config,
    /// Unexpected internal failure
    Internal,
}

impl ErrorCode {
    /// HTTP status code this category renders as
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::LtiOAuth | Self::Lti13 | Self::Signature => 401,
            Self::TenantMismatch | Self::LaunchForbidden => 403,
            Self::MissingLaunchParam => 422,
            Self::OAuth2Token | Self::Serializable | Self::InvalidInput => 400,
            Self::NotFound => 404,
            Self::ConcurrentTokenRefresh => 409,
            Self::ExternalRequest => 502,
            Self::Crypto | Self::Database | Self::Config | Self::Internal => 500,
        }
    }

    /// Stable string form used in JSON bodies and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LtiOAuth => "lti_oauth_error",
            Self::Lti13 => "lti13_error",
            Self::TenantMismatch => "tenant_mismatch",
            Self::MissingLaunchParam => "missing_launch_param",
            Self::LaunchForbidden => "launch_forbidden",
            Self::OAuth2Token => "oauth2_token_error",
            Self::ConcurrentTokenRefresh => "concurrent_token_refresh",
            Self::ExternalRequest => "external_request_error",
            Self::Serializable => "serializable_error",
            Self::Crypto => "crypto_error",
            Self::Signature => "signature_error",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Database => "database_error",
            Self::Config => "config_error",
            Self::Internal => "internal_error",
        }
    }

    /// Whether the message may be shown to the caller verbatim
    #[must_use]
    pub const fn is_user_facing(self) -> bool {
        !matches!(
            self,
            Self::Crypto | Self::Database | Self::Config | Self::Internal | Self::LtiOAuth
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which LTI 1.3 check rejected a launch
///
/// Logged for operators; the HTTP response only carries the coarse category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lti13ErrorKind {
    /// JWT header missing, unparsable, wrong `alg` or no `kid`
    Header,
    /// Platform JWKS unavailable or no key matches `kid`
    Jwks,
    /// Signature did not verify
    Signature,
    /// `iss` differs from the registration's issuer
    Issuer,
    /// `aud` does not contain the registration's `client_id`
    Audience,
    /// `azp` present and differs from `client_id`
    AuthorizedParty,
    /// `exp` elapsed beyond the allowed skew
    Expired,
    /// `iat` too far in the future
    IssuedInFuture,
    /// Nonce missing, unknown or already consumed
    Nonce,
    /// OIDC `state` missing, unknown or already consumed
    State,
    /// `deployment_id` does not belong to the registration
    Deployment,
    /// No registration matches the issuer / client id
    UnknownRegistration,
    /// Required LTI claim missing or malformed
    Claims,
}

/// Structured context attached to an [`AppError`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorDetails {
    /// Name of the offending launch parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// LTI 1.3 sub-kind (never rendered)
    #[serde(skip)]
    pub lti13_kind: Option<Lti13ErrorKind>,
    /// OAuth2 service the error concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Route the browser should call to recover
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_route: Option<String>,
    /// Whether the recovery route is a token refresh (true) or a full re-authorization
    #[serde(skip)]
    pub refreshable: bool,
    /// Caller-chosen machine string for [`ErrorCode::Serializable`]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_code: Option<String>,
    /// Status returned by the upstream server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    /// Correlation id linking a 5xx response to its log line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

/// Application error
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AppError {
    /// Error category
    pub code: ErrorCode,
    /// Human-readable message
    pub message: String,
    /// Structured context
    pub details: Box<ErrorDetails>,
}

impl AppError {
    /// Create an error with no structured details
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: Box::default(),
        }
    }

    fn with_details(code: ErrorCode, message: impl Into<String>, details: ErrorDetails) -> Self {
        Self {
            code,
            message: message.into(),
            details: Box::new(details),
        }
    }

    /// Database failure
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Database, message)
    }

    /// Unexpected internal failure
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Configuration problem
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Config, message)
    }

    /// Malformed request data
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Missing resource
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Malformed ciphertext, key or encoding
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Crypto, message)
    }

    /// Signature verification failure
    pub fn signature(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Signature, message)
    }

    /// LTI 1.1 OAuth failure
    pub fn lti_oauth(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LtiOAuth, message)
    }

    /// LTI 1.3 validation failure of the given kind
    pub fn lti13(kind: Lti13ErrorKind, message: impl Into<String>) -> Self {
        Self::with_details(
            ErrorCode::Lti13,
            message,
            ErrorDetails {
                lti13_kind: Some(kind),
                ..ErrorDetails::default()
            },
        )
    }

    /// Launch GUID conflicts with the tenant's recorded GUID
    pub fn tenant_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TenantMismatch, message)
    }

    /// Required launch parameter missing
    pub fn missing_launch_param(field: &str) -> Self {
        Self::with_details(
            ErrorCode::MissingLaunchParam,
            format!("Required launch parameter '{field}' is missing"),
            ErrorDetails {
                field: Some(field.to_owned()),
                ..ErrorDetails::default()
            },
        )
    }

    /// Launch refused outright
    pub fn launch_forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LaunchForbidden, message)
    }

    /// OAuth2 token problem the browser can recover from via `refresh_route`
    pub fn oauth2_token(
        service: &str,
        refresh_route: &str,
        refreshable: bool,
        message: impl Into<String>,
    ) -> Self {
        Self::with_details(
            ErrorCode::OAuth2Token,
            message,
            ErrorDetails {
                service: Some(service.to_owned()),
                refresh_route: Some(refresh_route.to_owned()),
                refreshable,
                ..ErrorDetails::default()
            },
        )
    }

    /// Refresh lock held elsewhere
    pub fn concurrent_token_refresh(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConcurrentTokenRefresh, message)
    }

    /// Upstream HTTP failure
    pub fn external_request(message: impl Into<String>, upstream_status: Option<u16>) -> Self {
        Self::with_details(
            ErrorCode::ExternalRequest,
            message,
            ErrorDetails {
                upstream_status,
                correlation_id: Some(Uuid::new_v4()),
                ..ErrorDetails::default()
            },
        )
    }

    /// Machine-readable LMS-specific problem
    pub fn serializable(problem_code: &str, message: impl Into<String>) -> Self {
        Self::with_details(
            ErrorCode::Serializable,
            message,
            ErrorDetails {
                problem_code: Some(problem_code.to_owned()),
                ..ErrorDetails::default()
            },
        )
    }

    /// Error category
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Whether this error has the given category
    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// LTI 1.3 sub-kind, when this is an LTI 1.3 error
    #[must_use]
    pub fn lti13_kind(&self) -> Option<Lti13ErrorKind> {
        self.details.lti13_kind
    }

    /// HTTP status this error renders as
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Message safe to render to the caller
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.code {
            ErrorCode::Lti13 => "LTI 1.3 launch validation failed".to_owned(),
            ErrorCode::LtiOAuth => "LTI launch could not be authenticated".to_owned(),
            code if code.is_user_facing() => self.message.clone(),
            _ => "Internal server error".to_owned(),
        }
    }
}

#[cfg(feature = "http-response")]
mod http_response {
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::Json;
    use serde_json::{json, Map, Value};
    use tracing::{error, warn};

    use super::{AppError, ErrorCode};

    impl IntoResponse for AppError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

            if status.is_server_error() {
                error!(
                    error_code = %self.code,
                    correlation_id = ?self.details.correlation_id,
                    upstream_status = ?self.details.upstream_status,
                    "{}", self.message
                );
            } else {
                warn!(
                    error_code = %self.code,
                    lti13_kind = ?self.details.lti13_kind,
                    "{}", self.message
                );
            }

            let error_code = self
                .details
                .problem_code
                .clone()
                .unwrap_or_else(|| self.code.as_str().to_owned());

            let body = if self.code == ErrorCode::LtiOAuth {
                json!({ "error_code": error_code })
            } else {
                let mut map = Map::new();
                map.insert("error_code".to_owned(), Value::String(error_code));
                map.insert("message".to_owned(), Value::String(self.public_message()));
                if let Ok(Value::Object(extra)) = serde_json::to_value(&*self.details) {
                    for (key, value) in extra {
                        if key != "problem_code" {
                            map.insert(key, value);
                        }
                    }
                }
                Value::Object(map)
            };

            (status, Json(body)).into_response()
        }
    }
}
