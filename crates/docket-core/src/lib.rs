//! # Docket Core
//!
//! Configuration and the error taxonomy shared by every Docket crate.

pub mod config;
pub mod error;

pub use config::DocketConfig;
pub use error::{DocketError, Result};
