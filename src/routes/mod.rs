// ABOUTME: Route module organization for the LTI launch HTTP endpoints
// ABOUTME: Assembles launch, JWKS, API and health routes behind the tracing layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module
//!
//! Each module contains route definitions and thin handlers that delegate
//! to the services held in [`ServerResources`].

// ═══════════════════════════════════════════════════════════════
// LTI
// ═══════════════════════════════════════════════════════════════

/// LTI 1.1 and 1.3 launch routes
pub mod lti;

/// Tool public key set
pub mod jwks;

// ═══════════════════════════════════════════════════════════════
// BROWSER API
// ═══════════════════════════════════════════════════════════════

/// Grant token and OAuth2 authorization routes
pub mod api;

/// Liveness probe
pub mod health;

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use api::ApiRoutes;
pub use health::HealthRoutes;
pub use jwks::JwksRoutes;
pub use lti::LtiRoutes;

use crate::context::ServerResources;

/// Launch bodies are small form posts
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Complete application router
#[must_use]
pub fn router(resources: Arc<ServerResources>) -> Router {
    let cors = api_cors_layer(&resources.config.rpc_allowed_origins);
    Router::new()
        .merge(HealthRoutes::routes())
        .merge(LtiRoutes::routes(resources.clone()))
        .merge(JwksRoutes::routes(resources.clone()))
        .merge(ApiRoutes::routes(resources).layer(cors))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}

/// CORS for `/api/*`; credentials are allowed, so origins are listed explicitly
fn api_cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .inspect_err(|e| warn!(origin, "Ignoring invalid allowed origin: {e}"))
                .ok()
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// `302 Found` to `location`
pub(crate) fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(e) => {
            warn!("Refusing to redirect to an invalid location: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
