// ABOUTME: LTI launch routes: 1.1 signed form posts, 1.3 OIDC login and id_token callback
// ABOUTME: Successful launches set the session cookie and render the client page with a grant token
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Form, Query, State},
    http::{header, uri::PathAndQuery, HeaderMap, Uri},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use html_escape::{encode_double_quoted_attribute, encode_script};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use url::{form_urlencoded, Url};

use crate::context::ServerResources;
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::lti::{LaunchContext, LaunchParams, OidcLoginRequest};
use crate::models::{ApplicationInstance, LtiVersion};
use crate::session::{set_session_cookie, SessionSubject};

use super::found;

/// LTI 1.1 launch endpoint
pub const LTI11_LAUNCH_PATH: &str = "/lti_launches";
/// OIDC login initiation endpoint
pub const OIDC_LOGIN_PATH: &str = "/lti/1.3/oidc";
/// LTI 1.3 launch (OIDC redirect) endpoint
pub const LTI13_LAUNCH_PATH: &str = "/lti/1.3/launches";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const RETURN_URL_PARAM: &str = "launch_presentation_return_url";

/// Body of the OIDC redirect back to the tool
#[derive(Debug, Default, Deserialize)]
pub struct Lti13LaunchForm {
    /// Signed platform JWT
    #[serde(default)]
    pub id_token: String,
    /// OIDC `state` from the login redirect
    #[serde(default)]
    pub state: String,
}

/// LTI launch routes
pub struct LtiRoutes;

impl LtiRoutes {
    /// Create all launch routes
    #[must_use]
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(LTI11_LAUNCH_PATH, post(Self::handle_lti11_launch))
            .route(
                OIDC_LOGIN_PATH,
                get(Self::handle_oidc_login_query).post(Self::handle_oidc_login_form),
            )
            .route(LTI13_LAUNCH_PATH, post(Self::handle_lti13_launch))
            .with_state(resources)
    }

    /// Handle POST /lti_launches
    async fn handle_lti11_launch(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        uri: Uri,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let is_form = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));
        if !is_form {
            return Err(AppError::invalid_input(format!(
                "LTI 1.1 launches must be {FORM_CONTENT_TYPE}"
            )));
        }

        let url = request_url(&resources, &headers, &uri)?;
        let form: Vec<(String, String)> = form_urlencoded::parse(&body).into_owned().collect();
        let (instance, params) = resources.oauth1.verify("POST", &url, &form).await?;
        Self::launch(&resources, instance, LtiVersion::V11, params).await
    }

    /// Handle GET /lti/1.3/oidc
    async fn handle_oidc_login_query(
        State(resources): State<Arc<ServerResources>>,
        Query(request): Query<OidcLoginRequest>,
    ) -> Result<Response, AppError> {
        Self::oidc_login(&resources, &request).await
    }

    /// Handle POST /lti/1.3/oidc
    async fn handle_oidc_login_form(
        State(resources): State<Arc<ServerResources>>,
        Form(request): Form<OidcLoginRequest>,
    ) -> Result<Response, AppError> {
        Self::oidc_login(&resources, &request).await
    }

    async fn oidc_login(
        resources: &ServerResources,
        request: &OidcLoginRequest,
    ) -> Result<Response, AppError> {
        let redirect_uri = resources
            .public_base()?
            .join(LTI13_LAUNCH_PATH)
            .map_err(|e| AppError::config(format!("Cannot build launch URL: {e}")))?;
        let location = resources
            .oidc
            .initiate(request, redirect_uri.as_str())
            .await?;
        Ok(found(location.as_str()))
    }

    /// Handle POST /lti/1.3/launches
    async fn handle_lti13_launch(
        State(resources): State<Arc<ServerResources>>,
        Form(form): Form<Lti13LaunchForm>,
    ) -> Result<Response, AppError> {
        let validated = resources
            .id_tokens
            .validate_launch(&form.id_token, &form.state)
            .await?;
        let params = LaunchParams::from_lti13_claims(&validated.claims);
        Self::launch(&resources, validated.instance, LtiVersion::V13, params).await
    }

    /// Resolve a verified launch; recoverable failures go back to the LMS
    async fn launch(
        resources: &ServerResources,
        instance: ApplicationInstance,
        lti_version: LtiVersion,
        params: LaunchParams,
    ) -> Result<Response, AppError> {
        let return_url = params.get(RETURN_URL_PARAM).map(str::to_owned);
        let result = match resources
            .launches
            .resolve(instance, lti_version, params, None)
            .await
        {
            Ok(context) => Self::complete_launch(resources, &context).await,
            Err(error) => Err(error),
        };

        result.or_else(|error| {
            lti_error_redirect(&error, return_url.as_deref()).ok_or(error)
        })
    }

    async fn complete_launch(
        resources: &ServerResources,
        context: &LaunchContext,
    ) -> AppResult<Response> {
        let identity = resources.identity.upsert_for_launch(context).await?;
        let grant_token = resources.grant_tokens.issue(&identity.h_userid)?;
        let session = resources.sessions.issue(SessionSubject {
            user_id: identity.user.id,
            application_instance_id: context.instance.id,
            h_userid: identity.h_userid.clone(),
            lti_version: context.lti_version,
            instructor: context.user.is_instructor,
        })?;

        let config = json!({
            "api_url": resources.config.h.api_url_public.as_str(),
            "authority": resources.config.h.authority,
            "h_userid": identity.h_userid,
            "group_id": identity.group_id,
            "lti_version": context.lti_version,
            "instructor": context.user.is_instructor,
            "display_name": context.user.display_name,
            "product_family": context.product_family,
            "context_title": context.context_title,
            "grant_token": grant_token,
        });
        let html = LAUNCH_TEMPLATE
            .replace(
                "{{GRANT_TOKEN}}",
                &encode_double_quoted_attribute(&grant_token),
            )
            .replace("{{CONFIG}}", &encode_script(&config.to_string()));

        info!(
            application_instance_id = context.instance.id,
            user_id = identity.user.id,
            lti_version = ?context.lti_version,
            product_family = ?context.product_family,
            "LTI launch completed"
        );

        let mut response = Html(html).into_response();
        set_session_cookie(response.headers_mut(), &session);
        Ok(response)
    }
}

const LAUNCH_TEMPLATE: &str = include_str!("../../templates/lti_launch.html");

/// 302 back to the LMS with `lti_errormsg`, for the failures the LMS can show
fn lti_error_redirect(error: &AppError, return_url: Option<&str>) -> Option<Response> {
    if !(error.is(ErrorCode::MissingLaunchParam) || error.is(ErrorCode::TenantMismatch)) {
        return None;
    }
    let mut url = Url::parse(return_url?).ok()?;
    url.query_pairs_mut()
        .append_pair("lti_errormsg", &error.public_message());
    warn!(
        error_code = %error.code(),
        "{}; redirecting to the LMS", error.message
    );
    Some(found(url.as_str()))
}

/// URL the LMS signed: the public base when configured, else `Host`
fn request_url(resources: &ServerResources, headers: &HeaderMap, uri: &Uri) -> AppResult<Url> {
    let path = uri.path_and_query().map_or("/", PathAndQuery::as_str);
    let base = if let Some(base) = resources.config.public_base() {
        base.clone()
    } else {
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::invalid_input("Request has no Host header"))?;
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("http");
        Url::parse(&format!("{scheme}://{host}"))
            .map_err(|e| AppError::invalid_input(format!("Invalid Host header: {e}")))?
    };
    base.join(path)
        .map_err(|e| AppError::invalid_input(format!("Invalid request path: {e}")))
}
