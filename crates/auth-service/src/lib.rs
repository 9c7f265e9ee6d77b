//! Bearer credential authentication service.
//!
//! Validates bearer credentials on every inbound request and turns them into
//! an authenticated [`auth::claims::AuthUser`] with a scope set, while keeping
//! load on the remote identity provider low:
//!
//! - concurrent requests with the same token share one introspection call
//! - introspection results are cached in Postgres, shared by all instances,
//!   and never outlive the token
//! - a failing IdP is skipped for a cooldown instead of being retried on
//!   every request
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> middleware/auth.rs -> auth/pipeline.rs -> auth/strategies.rs
//!                                                        -> services/user_profiles.rs -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - credential extraction, pipeline stages, IdP client, scope checks
//! - `config` - service configuration from environment
//! - `errors` - error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - authentication, scope and metrics middleware
//! - `repositories` - Postgres access (profiles, API tokens, introspection cache)
//! - `routes` - Axum router setup
//! - `services` - profile resolution
//! - `tasks` - background housekeeping

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod tasks;
