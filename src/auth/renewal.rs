//! Sliding-expiration renewal
//!
//! A verified token whose age has reached `ttl * threshold` is replaced. The
//! replacement travels in the `X-New-Token` response header only; the request
//! itself is authorised by the token it arrived with.

use crate::auth::jwt::SessionClaims;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Response header carrying a renewed session token
pub const NEW_TOKEN_HEADER: &str = "x-new-token";

#[derive(Debug, Clone, Copy)]
pub struct RenewalPolicy {
    ttl: Duration,
    threshold: f64,
}

impl RenewalPolicy {
    /// `threshold` is a fraction of `ttl` in (0, 1)
    pub fn new(ttl: Duration, threshold: f64) -> Self {
        Self { ttl, threshold }
    }

    /// Token age after which a replacement is issued
    pub fn renew_after(&self) -> Duration {
        self.ttl.mul_f64(self.threshold.clamp(0.0, 1.0))
    }

    pub fn should_renew(&self, claims: &SessionClaims, now: DateTime<Utc>) -> bool {
        let age = now.timestamp().saturating_sub(claims.iat);
        age >= 0 && age as u64 >= self.renew_after().as_secs()
    }
}
