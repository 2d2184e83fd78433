// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError wraps BillingError
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Clubboard API Library
//!
//! HTTP surface of the subscription lifecycle: platform admin operations,
//! club self-service, the payment provider callback and the cron trigger.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
