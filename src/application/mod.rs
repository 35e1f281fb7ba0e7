//! Request-level services: rate limiting, source fetching and cache-aware
//! rendering.

pub mod error;
pub mod fetch;
pub mod rate_limit;
pub mod render;
