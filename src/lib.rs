//! Rendering gateway: fetches markdown documents, renders them to sanitized HTML
//! and serves the result through a shared, chunked cache.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod presentation;
