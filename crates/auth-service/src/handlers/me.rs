//! Current caller endpoints.

use crate::auth::claims::AuthUser;
use crate::auth::scopes::authorize;
use crate::errors::AuthError;
use axum::extract::Query;
use axum::{Extension, Json};
use common::scope::ScopeSet;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

/// Response for `GET /api/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    pub id: Uuid,
    pub email: Option<String>,
    pub scopes: ScopeSet,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token_project_id: Option<Uuid>,
}

impl From<AuthUser> for MeResponse {
    fn from(user: AuthUser) -> Self {
        Self {
            id: user.id,
            email: user.email,
            scopes: user.scopes,
            project_id: user.project_id,
            org_id: user.org_id,
            api_token_id: user.api_token_id,
            api_token_project_id: user.api_token_project_id,
        }
    }
}

/// Handler for `GET /api/v1/me`.
///
/// The external subject is not returned; callers identify themselves by the
/// internal `id`.
#[instrument(skip_all, name = "auth.handlers.me")]
pub async fn get_me(Extension(user): Extension<AuthUser>) -> Json<MeResponse> {
    Json(MeResponse::from(user))
}

#[derive(Debug, Deserialize)]
pub struct ScopeCheckQuery {
    /// Space-delimited scopes to check.
    #[serde(default)]
    pub required: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScopeCheckResponse {
    pub granted: ScopeSet,
    pub required: ScopeSet,
}

/// Handler for `GET /api/v1/me/scopes?required=<scopes>`.
///
/// 200 when the caller holds every listed scope, 403 naming the missing ones
/// otherwise.
#[instrument(skip_all, name = "auth.handlers.me_scopes")]
pub async fn check_scopes(
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ScopeCheckQuery>,
) -> Result<Json<ScopeCheckResponse>, AuthError> {
    let required = ScopeSet::from_space_delimited(&query.required);
    authorize(&user, &required)?;

    Ok(Json(ScopeCheckResponse {
        granted: user.scopes,
        required,
    }))
}
