//! Database access.

pub mod api_tokens;
pub mod introspection_cache;
pub mod user_profiles;
