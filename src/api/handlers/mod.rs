pub mod listings;
pub mod system;

pub use listings::*;
pub use system::*;

use crate::auth::service::AuthService;
use crate::db::manager::DatabaseManager;
use crate::db::repository::{ListingRepository, UserRepository};
use std::sync::Arc;

/// Shared application state for handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseManager>,
    pub user_repo: Arc<UserRepository>,
    pub listing_repo: Arc<ListingRepository>,
    pub auth_service: Arc<AuthService>,
}
