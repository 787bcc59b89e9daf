//! Rent Kenya Backend Library
//!
//! REST backend for house rental listings: accounts with session tokens,
//! login lockout and password reset, plus listings that only their seller
//! may change.

pub mod api;
pub mod auth;
pub mod core;
pub mod db;

// Re-export commonly used types
pub use api::ApiServer;
pub use auth::AuthService;
pub use crate::core::Config;
pub use db::DatabaseManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
