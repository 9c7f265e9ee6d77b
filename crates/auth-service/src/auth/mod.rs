//! Bearer credential authentication.

pub mod circuit_breaker;
pub mod claims;
pub mod coalescer;
pub mod dev_tokens;
pub mod extractor;
pub mod idp_client;
pub mod pipeline;
pub mod scopes;
pub mod strategies;
pub mod token_hash;
