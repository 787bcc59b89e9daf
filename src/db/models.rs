//! Database models
//!
//! Data structures representing database tables

use crate::auth::governor::LockoutState;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Identity record in the database
///
/// Never serialised to clients directly; handlers map it to a public view.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    /// Normalised (trimmed, lowercase)
    pub email: String,
    /// `None` for federated-only accounts
    pub password_hash: Option<String>,
    pub phone: Option<String>,
    pub federated_id: Option<String>,
    pub failed_login_attempts: u32,
    pub account_locked: bool,
    pub lockout_until: Option<i64>,
    /// Version marker embedded in session tokens
    pub last_password_change: i64,
    pub last_login_at: Option<i64>,
    pub reset_token_hash: Option<String>,
    pub reset_expires: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn lockout_state(&self) -> LockoutState {
        LockoutState {
            failed_attempts: self.failed_login_attempts,
            locked: self.account_locked,
            lockout_until: self.lockout_until.and_then(millis_to_datetime),
        }
    }
}

/// Seller sub-record embedded in a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seller {
    pub id: String,
    pub username: String,
    pub email: String,
}

/// House listing record in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub location: String,
    pub price: i64,
    pub description: String,
    pub image_url: Option<String>,
    pub seller: Seller,
    pub created_at: String,
    pub updated_at: String,
}

/// Convert a stored unix-millisecond column back to a timestamp
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
