//! Listing ownership checks

use crate::core::error::{Result, RentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Permitted,
    Forbidden,
}

/// Only the identity recorded as seller may mutate a listing
pub fn authorize(identity_id: &str, seller_id: &str) -> Access {
    if !identity_id.is_empty() && identity_id == seller_id {
        Access::Permitted
    } else {
        Access::Forbidden
    }
}

impl Access {
    pub fn require(self) -> Result<()> {
        match self {
            Access::Permitted => Ok(()),
            Access::Forbidden => Err(RentError::PermissionDenied(
                "You can only modify your own listings".to_string(),
            )),
        }
    }
}
