//! Password hashing and verification using bcrypt
//!
//! bcrypt is CPU-bound; request handlers use the `_async` variants so the
//! work runs on the blocking pool instead of an executor thread.

use crate::core::error::{Result, RentError};

/// bcrypt only reads this many bytes of its input; longer passwords would
/// collide on their shared prefix
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

impl PasswordHasher {
    /// `cost` is the bcrypt work factor (4..=31)
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Hash a password using bcrypt
    pub fn hash(&self, password: &str) -> Result<String> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(RentError::ValidationError(format!(
                "Password must be at most {} bytes",
                MAX_PASSWORD_BYTES
            )));
        }
        bcrypt::hash(password, self.cost)
            .map_err(|e| RentError::HashingError(format!("Failed to hash password: {}", e)))
    }

    /// Verify a password against a hash
    ///
    /// A mismatch, an unparseable stored hash and a candidate longer than
    /// bcrypt can read all yield `false`.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        if password.len() > MAX_PASSWORD_BYTES {
            return false;
        }
        match bcrypt::verify(password, hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "Stored password hash could not be verified");
                false
            }
        }
    }

    pub async fn hash_async(&self, password: &str) -> Result<String> {
        let hasher = *self;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| RentError::TaskError(format!("Hashing task panicked: {}", e)))?
    }

    pub async fn verify_async(&self, password: &str, hash: &str) -> Result<bool> {
        let hasher = *self;
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| RentError::TaskError(format!("Verification task panicked: {}", e)))
    }
}
