//! Authentication and scope middleware for protected routes.
//!
//! `require_auth` extracts the bearer credential, runs the authentication
//! pipeline, and stores the resulting [`AuthUser`] in request extensions.
//! `require_scopes` must be layered inside it and rejects callers that lack
//! any of the route's required scopes.

use crate::auth::claims::AuthUser;
use crate::auth::extractor::extract_token;
use crate::auth::pipeline::AuthPipeline;
use crate::auth::scopes::authorize;
use crate::errors::AuthError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};
use common::scope::ScopeSet;
use std::sync::Arc;
use tracing::instrument;

pub const PROJECT_ID_HEADER: &str = "x-project-id";
pub const ORG_ID_HEADER: &str = "x-org-id";

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub pipeline: Arc<AuthPipeline>,

    /// Accept `X-API-Key` as a credential source.
    pub standalone_mode: bool,
}

/// Authentication middleware.
///
/// # Response
///
/// - 400 when no credential is presented
/// - 401 with `WWW-Authenticate` when the credential is invalid
/// - Otherwise continues with [`AuthUser`] in extensions. `X-Project-ID` and
///   `X-Org-ID` are copied onto it verbatim.
#[instrument(skip_all, name = "auth.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let extracted = extract_token(req.headers(), req.uri(), state.standalone_mode);
    if let Some(extracted) = &extracted {
        tracing::debug!(
            target: "auth.middleware.auth",
            source = extracted.source.as_str(),
            "Credential presented"
        );
    }

    let mut user = state
        .pipeline
        .authenticate(extracted.as_ref().map(|e| &e.token))
        .await?;

    user.project_id = header_value(req.headers(), PROJECT_ID_HEADER);
    user.org_id = header_value(req.headers(), ORG_ID_HEADER);

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Scopes a route requires.
#[derive(Debug, Clone)]
pub struct RequiredScopes(pub ScopeSet);

impl RequiredScopes {
    pub fn new<S: Into<String>>(scopes: impl IntoIterator<Item = S>) -> Self {
        Self(scopes.into_iter().collect())
    }
}

/// Scope gate. Layer it inside [`require_auth`].
///
/// Responds 403 with `missing_scopes` when the caller lacks any required
/// scope.
#[instrument(skip_all, name = "auth.middleware.scopes")]
pub async fn require_scopes(
    State(required): State<Arc<RequiredScopes>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, AuthError> {
    let Some(user) = req.auth_user() else {
        tracing::error!(
            target: "auth.middleware.scopes",
            "Scope gate reached without an authenticated user; require_auth is not applied"
        );
        return Err(AuthError::Internal);
    };

    authorize(user, &required.0)?;
    Ok(next.run(req).await)
}

/// Extension trait for reading the authenticated user from a request.
pub trait AuthUserExt {
    /// `None` if the auth middleware was not applied to this request.
    fn auth_user(&self) -> Option<&AuthUser>;
}

impl<B> AuthUserExt for axum::extract::Request<B> {
    fn auth_user(&self) -> Option<&AuthUser> {
        self.extensions().get::<AuthUser>()
    }
}
