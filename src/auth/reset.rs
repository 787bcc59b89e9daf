//! Password reset tickets
//!
//! The raw secret leaves the process exactly once, through a `ResetNotifier`.
//! Only its SHA-256 digest is stored, so a leaked database row cannot be
//! replayed as a ticket.

use crate::core::error::Result;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;

const SECRET_BYTES: usize = 32;

/// A freshly generated ticket: the secret for the caller, the digest for the store
#[derive(Clone)]
pub struct ResetTicket {
    pub secret: String,
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for ResetTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetTicket")
            .field("secret", &"<redacted>")
            .field("digest", &self.digest)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResetTickets {
    ttl: Duration,
}

impl Default for ResetTickets {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl ResetTickets {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn generate(&self, now: DateTime<Utc>) -> ResetTicket {
        let mut bytes = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let secret = URL_SAFE_NO_PAD.encode(bytes);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(1));

        ResetTicket {
            digest: Self::digest(&secret),
            secret,
            expires_at: now + ttl,
        }
    }

    /// Lowercase hex SHA-256 of the presented secret
    pub fn digest(secret: &str) -> String {
        let hash = Sha256::digest(secret.trim().as_bytes());
        hash.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Out-of-band delivery of a reset secret to the account holder
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn deliver(&self, user_id: &str, email: &str, ticket: &ResetTicket) -> Result<()>;
}

/// Records that a ticket was issued; the secret itself is never written out
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResetNotifier;

#[async_trait]
impl ResetNotifier for LogResetNotifier {
    async fn deliver(&self, user_id: &str, _email: &str, ticket: &ResetTicket) -> Result<()> {
        tracing::info!(
            user_id = %user_id,
            expires_at = %ticket.expires_at.to_rfc3339(),
            "Password reset ticket issued"
        );
        Ok(())
    }
}
