//! # Docket Gateway
//!
//! HTTP API over the node lifecycle and notification scheduler.
//! JSON bodies carry `"ok": true|false`; domain errors map onto status codes
//! in [`error::ApiError`].

pub mod error;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, build_router, start};
