//! Fixed development and end-to-end test tokens.
//!
//! Only consulted outside production. Each token maps to a fixed subject and
//! scope set; any other `e2e-<suffix>` token maps to `test-user-<suffix>`
//! with the full catalog, so parallel test suites can get distinct users.

use common::scope::ScopeSet;

pub const DEV_TOKEN_PREFIX: &str = "e2e-";

/// Fixed identity for a development token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevIdentity {
    pub subject: String,
    pub email: String,
    pub scopes: ScopeSet,
}

impl DevIdentity {
    fn new(subject: impl Into<String>, scopes: ScopeSet) -> Self {
        let subject = subject.into();
        Self {
            email: format!("{subject}@test.local"),
            subject,
            scopes,
        }
    }
}

/// Identity for `token`, or `None` if it is not a development token.
pub fn resolve(token: &str) -> Option<DevIdentity> {
    let identity = match token {
        "e2e-all" => DevIdentity::new("e2e-test-user", ScopeSet::all()),
        "e2e-no-scope" => DevIdentity::new("e2e-no-scope-user", ScopeSet::new()),
        "e2e-read-only" => DevIdentity::new("e2e-read-only-user", ScopeSet::read_only()),
        "e2e-superadmin" => DevIdentity::new("e2e-superadmin-user", ScopeSet::all()),
        other => {
            let suffix = other
                .strip_prefix(DEV_TOKEN_PREFIX)
                .filter(|s| !s.is_empty())?;
            DevIdentity::new(format!("test-user-{suffix}"), ScopeSet::all())
        }
    };
    Some(identity)
}
