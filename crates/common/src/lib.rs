//! Common types shared across Gatekeeper components.

#![warn(clippy::pedantic)]

/// Module for the scope catalog and scope set arithmetic
pub mod scope;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for service-account keys and JWT-profile client assertions
pub mod service_account;
