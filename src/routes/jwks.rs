// ABOUTME: Public key set endpoint for platforms verifying this tool's signatures
// ABOUTME: Serves every non-expired key of the rotating RSA keyset
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};

use crate::context::ServerResources;
use crate::crypto::JsonWebKeySet;
use crate::errors::AppError;

/// JWKS path registered with platforms
pub const JWKS_PATH: &str = "/lti/1.3/jwks";

/// JWKS routes
pub struct JwksRoutes;

impl JwksRoutes {
    /// Create the JWKS route
    #[must_use]
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(JWKS_PATH, get(Self::handle_jwks))
            .with_state(resources)
    }

    async fn handle_jwks(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Json<JsonWebKeySet>, AppError> {
        Ok(Json(resources.keyset.jwks().await?))
    }
}
