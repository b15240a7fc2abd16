//! # grest HTTP Server Module
//!
//! Serves the route table over HTTP with axum.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - everything else - looked up in the route table; unknown paths answer 404,
//!   known paths with the wrong method 405

pub mod config;
mod errors;
mod handler;
mod server;

pub use config::HttpServerConfig;
pub use errors::{ApiError, ApiResult, ErrorResponse};
pub use handler::AppState;
pub use server::{build_router, HttpServer};
