//! Per-route scope authorization.

use crate::auth::claims::AuthUser;
use crate::errors::AuthError;
use crate::observability::{hash_for_correlation, metrics};
use common::scope::ScopeSet;

/// Accept iff `user` holds every scope in `required`.
///
/// # Errors
///
/// `Forbidden` naming exactly the missing scopes, sorted.
pub fn authorize(user: &AuthUser, required: &ScopeSet) -> Result<(), AuthError> {
    if user.scopes.is_superset_of(required) {
        return Ok(());
    }

    let missing = user.scopes.missing(required);
    metrics::record_scope_denied();
    tracing::debug!(
        target: "auth.scopes",
        user = %hash_for_correlation(&user.external_subject),
        missing = ?missing,
        "Insufficient scope"
    );
    Err(AuthError::Forbidden { missing })
}
