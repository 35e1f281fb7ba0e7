//! HTTP surface: render routes, health check and access logging.

mod client;
mod middleware;
mod public;

pub use client::{ClientAddr, Visitor};
pub use middleware::RequestContext;
pub use public::{HttpState, build_router};
