//! Background tasks.

pub mod cache_purge;

pub use cache_purge::start_cache_purge;
