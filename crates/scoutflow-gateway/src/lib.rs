//! Scoutflow Gateway - HTTP request surface over the orchestrator

pub mod auth;
pub mod error;
pub mod server;

pub use error::ApiError;
pub use server::{router, start_gateway, CriteriaCheck, GatewayState};
