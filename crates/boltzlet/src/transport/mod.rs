//! Transport layer for boltzlet.
//!
//! Currently provides HTTP transport via axum.

pub mod http;

pub use http::{ServerConfig, routes, serve};
