//! Authentication module
//!
//! This module provides authentication functionality including:
//! - Registration, login and password lifecycle flows
//! - Session tokens with sliding renewal
//! - Login lockout after repeated failures
//! - Listing ownership checks
//! - Authentication middleware

pub mod governor;
pub mod handlers;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod ownership;
pub mod password;
pub mod policy;
pub mod renewal;
pub mod reset;
pub mod service;

pub use governor::{Admission, LockoutState, LoginGovernor};
pub use jwt::{SessionClaims, TokenError, TokenService};
pub use middleware::{authenticate, AuthUser};
pub use ownership::{authorize, Access};
pub use password::PasswordHasher;
pub use renewal::{RenewalPolicy, NEW_TOKEN_HEADER};
pub use reset::{LogResetNotifier, ResetNotifier, ResetTickets};
pub use service::AuthService;
