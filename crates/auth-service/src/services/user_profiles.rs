//! User profile resolution.
//!
//! Turns an authenticated external subject into a stable internal profile ID,
//! creating or reactivating the profile as needed and syncing the email and
//! display name the IdP reports.
//!
//! Resolution order:
//! 1. Active profile for the subject.
//! 2. Most recently soft-deleted profile, reactivated in place.
//! 3. New profile (`INSERT ... ON CONFLICT` so concurrent first logins for the
//!    same subject converge on one row).

use crate::auth::claims::ProfileInfo;
use crate::errors::AuthError;
use crate::observability::hash_for_correlation;
use crate::repositories::user_profiles::{self, UserProfile};
use sqlx::PgPool;
use tracing::instrument;

#[async_trait::async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Find, reactivate or create the profile for `subject` and sync `info`.
    async fn ensure_profile(
        &self,
        subject: &str,
        info: Option<&ProfileInfo>,
    ) -> Result<UserProfile, AuthError>;
}

/// Trim and lowercase an email. Returns `None` for blank input.
pub fn normalize_email(email: &str) -> Option<String> {
    let trimmed = email.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_lowercase())
}

#[derive(Clone)]
pub struct UserProfileService {
    pool: PgPool,
}

impl UserProfileService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ProfileResolver for UserProfileService {
    #[instrument(skip_all, name = "auth.service.ensure_profile", fields(subject = %hash_for_correlation(subject)))]
    async fn ensure_profile(
        &self,
        subject: &str,
        info: Option<&ProfileInfo>,
    ) -> Result<UserProfile, AuthError> {
        let email = info
            .and_then(|i| i.email.as_deref())
            .and_then(normalize_email);
        let display_name = info
            .and_then(|i| i.display_name.as_deref())
            .map(str::trim)
            .filter(|n| !n.is_empty());

        let mut profile =
            if let Some(mut active) =
                user_profiles::find_active_by_subject(&self.pool, subject).await?
            {
                if let Some(name) = display_name {
                    if active.display_name.as_deref().unwrap_or("").is_empty()
                        && user_profiles::fill_display_name(&self.pool, active.id, name).await?
                    {
                        active.display_name = Some(name.to_string());
                    }
                }
                active
            } else if let Some(mut reactivated) =
                user_profiles::reactivate_by_subject(&self.pool, subject).await?
            {
                tracing::info!(
                    target: "auth.profiles",
                    profile_id = %reactivated.id,
                    "Reactivated soft-deleted profile"
                );
                if let Some(name) = display_name {
                    if user_profiles::fill_display_name(&self.pool, reactivated.id, name).await? {
                        reactivated.display_name = Some(name.to_string());
                    }
                }
                reactivated
            } else {
                let created = user_profiles::insert_or_get(&self.pool, subject, display_name).await?;
                tracing::debug!(
                    target: "auth.profiles",
                    profile_id = %created.id,
                    "Profile resolved by insert"
                );
                created
            };

        profile.email = match email {
            Some(email) => {
                user_profiles::add_email_if_absent(&self.pool, profile.id, &email).await?;
                Some(email)
            }
            None => user_profiles::primary_email(&self.pool, profile.id).await?,
        };

        Ok(profile)
    }
}

/// In-memory resolver for pipeline tests.
pub mod mock {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    /// Assigns one ID per subject on first sight and returns it thereafter.
    #[derive(Default)]
    pub struct MockProfileResolver {
        profiles: Mutex<HashMap<String, UserProfile>>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl MockProfileResolver {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn profile_count(&self) -> usize {
            self.profiles.lock().len()
        }
    }

    #[async_trait::async_trait]
    impl ProfileResolver for MockProfileResolver {
        async fn ensure_profile(
            &self,
            subject: &str,
            info: Option<&ProfileInfo>,
        ) -> Result<UserProfile, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AuthError::Database("mock profile failure".to_string()));
            }

            let email = info
                .and_then(|i| i.email.as_deref())
                .and_then(normalize_email);
            let mut profiles = self.profiles.lock();
            let profile = profiles
                .entry(subject.to_string())
                .or_insert_with(|| UserProfile {
                    id: Uuid::new_v4(),
                    external_subject: subject.to_string(),
                    display_name: info.and_then(|i| i.display_name.clone()),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    deleted_at: None,
                    deleted_by: None,
                    email: None,
                });
            if email.is_some() {
                profile.email = email;
            }
            Ok(profile.clone())
        }
    }
}
