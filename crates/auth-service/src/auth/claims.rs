//! Identity types produced by authentication.
//!
//! Subjects and emails are redacted in Debug output to prevent exposure in
//! logs.

use common::scope::ScopeSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// Token claims
// =============================================================================

/// What a credential asserts about its bearer, independent of where it came
/// from.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Stable external subject identifier - redacted in Debug output.
    pub subject: String,

    /// Email - redacted in Debug output.
    pub email: Option<String>,

    pub scopes: ScopeSet,

    /// Expiration timestamp (Unix epoch seconds), when known.
    pub expires_at: Option<i64>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("scopes", &self.scopes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Introspection (RFC 7662)
// =============================================================================

/// Response body of the IdP introspection endpoint.
///
/// Stored verbatim as JSONB in the introspection cache, so unknown claims are
/// kept in `extra` and survive a round trip.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct IntrospectionResult {
    pub active: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Space-delimited scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Debug for IntrospectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntrospectionResult")
            .field("active", &self.active)
            .field("sub", &self.sub.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("client_id", &self.client_id)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

impl IntrospectionResult {
    /// An `{"active": false}` response.
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            scope: None,
            client_id: None,
            username: None,
            name: None,
            email: None,
            exp: None,
            iat: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Claims for an active result with a subject. `None` otherwise.
    pub fn claims(&self) -> Option<TokenClaims> {
        if !self.active {
            return None;
        }
        let subject = self.sub.as_deref().filter(|s| !s.is_empty())?;

        Some(TokenClaims {
            subject: subject.to_string(),
            email: self.email.clone(),
            scopes: self
                .scope
                .as_deref()
                .map(ScopeSet::from_space_delimited)
                .unwrap_or_default(),
            expires_at: self.exp,
        })
    }

    /// Display name the IdP reports, preferring `name` over `username`.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .or(self.username.as_deref())
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
    }

    /// Milliseconds until `exp`, or `None` if the token carries no expiry.
    pub fn remaining_lifetime_ms(&self, now_ms: i64) -> Option<i64> {
        self.exp
            .map(|exp| exp.saturating_mul(1000).saturating_sub(now_ms))
    }

    /// True once `exp` has been reached. Tokens without `exp` never expire.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.remaining_lifetime_ms(now_ms).is_some_and(|r| r <= 0)
    }
}

// =============================================================================
// Userinfo (OIDC)
// =============================================================================

/// Response body of the OIDC userinfo endpoint.
#[derive(Clone, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub sub: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub preferred_username: Option<String>,
}

impl fmt::Debug for UserInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserInfo")
            .field("sub", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("name", &self.name)
            .finish()
    }
}

impl UserInfo {
    pub fn display_name(&self) -> Option<String> {
        self.name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .filter(|n| !n.trim().is_empty())
            .map(str::to_string)
    }
}

// =============================================================================
// Pipeline output
// =============================================================================

/// Which pipeline stage produced a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Standalone,
    DevToken,
    ApiToken,
    Cache,
    Introspection,
    Userinfo,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::Standalone => "standalone",
            CredentialSource::DevToken => "dev_token",
            CredentialSource::ApiToken => "api_token",
            CredentialSource::Cache => "cache",
            CredentialSource::Introspection => "introspection",
            CredentialSource::Userinfo => "userinfo",
        }
    }
}

/// Binding carried by a local API token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiTokenBinding {
    pub token_id: Uuid,
    pub project_id: Option<Uuid>,
}

/// A credential a stage has accepted, before profile resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCredential {
    pub claims: TokenClaims,
    pub profile: ProfileInfo,
    pub source: CredentialSource,
    pub api_token: Option<ApiTokenBinding>,
}

impl VerifiedCredential {
    pub fn new(claims: TokenClaims, source: CredentialSource) -> Self {
        let profile = ProfileInfo {
            email: claims.email.clone(),
            display_name: None,
        };
        Self {
            claims,
            profile,
            source,
            api_token: None,
        }
    }

    pub fn with_display_name(mut self, display_name: Option<String>) -> Self {
        self.profile.display_name = display_name;
        self
    }

    pub fn with_api_token(mut self, binding: ApiTokenBinding) -> Self {
        self.api_token = Some(binding);
        self
    }
}

/// Profile attributes observed from the IdP, used to sync the local profile.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

impl fmt::Debug for ProfileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileInfo")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("display_name", &self.display_name)
            .finish()
    }
}

// =============================================================================
// AuthUser
// =============================================================================

/// The authenticated caller, stored in request extensions for one request.
#[derive(Clone)]
pub struct AuthUser {
    /// Internal profile ID.
    pub id: Uuid,

    /// IdP subject - redacted in Debug output.
    pub external_subject: String,

    pub email: Option<String>,

    pub scopes: ScopeSet,

    /// Copied verbatim from `X-Project-ID`.
    pub project_id: Option<String>,

    /// Copied verbatim from `X-Org-ID`.
    pub org_id: Option<String>,

    /// Project an API token is bound to, if any.
    pub api_token_project_id: Option<Uuid>,

    pub api_token_id: Option<Uuid>,
}

impl fmt::Debug for AuthUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthUser")
            .field("id", &self.id)
            .field("external_subject", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .field("scopes", &self.scopes)
            .field("project_id", &self.project_id)
            .field("org_id", &self.org_id)
            .field("api_token_project_id", &self.api_token_project_id)
            .field("api_token_id", &self.api_token_id)
            .finish()
    }
}
