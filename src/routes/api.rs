// ABOUTME: Session-authenticated JSON API: grant tokens and the per-service OAuth2 flow
// ABOUTME: Authorize redirects to the LMS, callback stores the token, refresh renews it
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # API routes
//!
//! Every route requires the launch session (cookie or bearer). The OAuth2
//! callback additionally redeems its signed `state`, which must have been
//! issued to that same session.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use html_escape::encode_text;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::context::ServerResources;
use crate::errors::{AppError, AppResult};
use crate::models::{ApplicationInstance, OAuth2Service};
use crate::oauth2_tokens::{OAuth2Endpoints, TokenOwner};
use crate::services::OAuthHttpService;
use crate::session::SessionClaims;

use super::found;

const OAUTH2_COMPLETE_TEMPLATE: &str = include_str!("../../templates/oauth2_complete.html");

/// Query of the OAuth2 redirect back from the LMS
#[derive(Debug, Default, Deserialize)]
pub struct OAuth2CallbackQuery {
    /// Authorization code
    #[serde(default)]
    pub code: Option<String>,
    /// Signed OAuth2 `state`
    #[serde(default)]
    pub state: Option<String>,
    /// Set by the LMS when the user declined
    #[serde(default)]
    pub error: Option<String>,
}

/// API routes
pub struct ApiRoutes;

impl ApiRoutes {
    /// Create all API routes
    #[must_use]
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/grant_token", get(Self::handle_grant_token))
            .route("/api/:service/oauth/authorize", get(Self::handle_authorize))
            .route("/api/:service/oauth/callback", get(Self::handle_callback))
            .route("/api/:service/oauth/refresh", post(Self::handle_refresh))
            .with_state(resources)
    }

    /// Handle GET /api/grant_token
    async fn handle_grant_token(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let session = resources.sessions.from_headers(&headers)?;
        let grant_token = resources.grant_tokens.issue(&session.h_userid)?;
        Ok(Json(json!({ "grant_token": grant_token })))
    }

    /// Handle GET /api/{service}/oauth/authorize
    async fn handle_authorize(
        State(resources): State<Arc<ServerResources>>,
        Path(service): Path<String>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let service = parse_service(&service)?;
        let session = resources.sessions.from_headers(&headers)?;
        let instance = resources
            .tenants
            .require(session.application_instance_id)
            .await?;
        let endpoints = endpoints_for(&resources, service, &instance)?;
        let state = resources.oauth2_state.encode(&session, service).await?;
        Ok(found(endpoints.authorization_url(&state).as_str()))
    }

    /// Handle GET /api/{service}/oauth/callback
    async fn handle_callback(
        State(resources): State<Arc<ServerResources>>,
        Path(service): Path<String>,
        Query(query): Query<OAuth2CallbackQuery>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let service = parse_service(&service)?;
        if let Some(error) = query.error.as_deref() {
            warn!(%service, error, "User did not authorize the LMS");
            return Err(AppError::oauth2_token(
                service.as_str(),
                &service.authorize_route(),
                false,
                format!("{service} authorization was declined"),
            ));
        }
        let state = query
            .state
            .as_deref()
            .ok_or_else(|| AppError::invalid_input("OAuth2 callback has no state"))?;
        let code = query
            .code
            .as_deref()
            .ok_or_else(|| AppError::invalid_input("OAuth2 callback has no code"))?;

        let session = resources.sessions.from_headers(&headers)?;
        let claims = resources
            .oauth2_state
            .redeem(state, service, &session)
            .await?;
        let instance = resources
            .tenants
            .require(claims.application_instance_id)
            .await?;
        let endpoints = endpoints_for(&resources, service, &instance)?;
        let owner = TokenOwner {
            application_instance_id: instance.id,
            user_id: claims.user_id,
        };
        resources
            .oauth2_tokens
            .get_access_token(owner, &endpoints, code)
            .await?;

        let html = OAUTH2_COMPLETE_TEMPLATE.replace("{{SERVICE}}", &encode_text(service.as_str()));
        Ok(Html(html).into_response())
    }

    /// Handle POST /api/{service}/oauth/refresh
    async fn handle_refresh(
        State(resources): State<Arc<ServerResources>>,
        Path(service): Path<String>,
        headers: HeaderMap,
    ) -> Result<Json<serde_json::Value>, AppError> {
        let service = parse_service(&service)?;
        let session = resources.sessions.from_headers(&headers)?;
        let instance = resources
            .tenants
            .require(session.application_instance_id)
            .await?;
        let endpoints = endpoints_for(&resources, service, &instance)?;
        let client = OAuthHttpService::new(
            resources.http.clone(),
            resources.oauth2_tokens.clone(),
            owner_of(&session),
            endpoints,
        );
        client.refresh().await?;
        info!(%service, user_id = session.user_id, "OAuth2 token refreshed on request");
        Ok(Json(json!({ "refreshed": true })))
    }
}

fn parse_service(raw: &str) -> AppResult<OAuth2Service> {
    raw.parse()
        .map_err(|_| AppError::not_found(format!("No OAuth2 service named {raw}")))
}

const fn owner_of(session: &SessionClaims) -> TokenOwner {
    TokenOwner {
        application_instance_id: session.application_instance_id,
        user_id: session.user_id,
    }
}

fn endpoints_for(
    resources: &ServerResources,
    service: OAuth2Service,
    instance: &ApplicationInstance,
) -> AppResult<OAuth2Endpoints> {
    let settings = resources.tenants.settings(instance);
    OAuth2Endpoints::resolve(
        service,
        instance,
        &settings,
        resources.tenants.cipher(),
        &resources.public_base()?,
    )
}
