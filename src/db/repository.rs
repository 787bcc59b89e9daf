//! Repository pattern implementation for data access layer
//!
//! This module provides the Repository pattern for abstracting database
//! operations, plus the single-statement or write-locked updates the auth
//! core relies on for its atomicity guarantees.

use crate::auth::governor::{Admission, LockoutState, LoginGovernor};
use crate::core::error::{Result, RentError};
use crate::db::manager::DatabaseManager;
use crate::db::models::{millis_to_datetime, Listing, Seller, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::sync::Arc;

/// Generic repository trait for CRUD operations
#[async_trait]
pub trait Repository<T>: Send + Sync {
    /// Find an entity by its ID
    async fn find_by_id(&self, id: &str) -> Result<Option<T>>;

    /// Find all entities
    async fn find_all(&self) -> Result<Vec<T>>;

    /// Create a new entity
    async fn create(&self, entity: &T) -> Result<()>;

    /// Update an existing entity
    async fn update(&self, entity: &T) -> Result<()>;

    /// Delete an entity by its ID
    async fn delete(&self, id: &str) -> Result<()>;
}

const USER_COLUMNS: &str = "id, username, email, password_hash, phone, federated_id, \
     failed_login_attempts, account_locked, lockout_until, last_password_change, \
     last_login_at, reset_token_hash, reset_expires, created_at, updated_at";

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        phone: row.get(4)?,
        federated_id: row.get(5)?,
        failed_login_attempts: row.get(6)?,
        account_locked: row.get(7)?,
        lockout_until: row.get(8)?,
        last_password_change: row.get(9)?,
        last_login_at: row.get(10)?,
        reset_token_hash: row.get(11)?,
        reset_expires: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn lockout_of(row: &Row<'_>) -> rusqlite::Result<LockoutState> {
    let failed_attempts: u32 = row.get(0)?;
    let locked: bool = row.get(1)?;
    let lockout_until: Option<i64> = row.get(2)?;
    Ok(LockoutState {
        failed_attempts,
        locked,
        lockout_until: lockout_until.and_then(millis_to_datetime),
    })
}

/// Name the column behind a UNIQUE violation on `users`
fn user_conflict(err: rusqlite::Error) -> RentError {
    let what = match &err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("users.email") => "Email",
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("users.username") => "Username",
        _ => "Account",
    };
    crate::core::error::map_unique_violation(err, what)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Repository for identities
pub struct UserRepository {
    db: Arc<DatabaseManager>,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
                Ok(conn.query_row(&sql, [&id], row_to_user).optional()?)
            })
            .await
    }

    /// Find a user by normalised email
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
                Ok(conn.query_row(&sql, [&email], row_to_user).optional()?)
            })
            .await
    }

    /// Find a user by username (case-insensitive)
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = username.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {} FROM users WHERE username = ?", USER_COLUMNS);
                Ok(conn.query_row(&sql, [&username], row_to_user).optional()?)
            })
            .await
    }

    /// Find the holder of a live reset ticket
    pub async fn find_by_reset_token(&self, token_hash: &str, now: DateTime<Utc>) -> Result<Option<User>> {
        let token_hash = token_hash.to_string();
        let now = now.timestamp_millis();
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {} FROM users WHERE reset_token_hash = ? AND reset_expires > ?",
                    USER_COLUMNS
                );
                Ok(conn
                    .query_row(&sql, params![&token_hash, now], row_to_user)
                    .optional()?)
            })
            .await
    }

    /// Insert a new identity; duplicate email or username becomes `Conflict`
    pub async fn create(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (id, username, email, password_hash, phone, federated_id, \
                     failed_login_attempts, account_locked, lockout_until, last_password_change, \
                     created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, 0, 0, NULL, ?, ?, ?)",
                    params![
                        &user.id,
                        &user.username,
                        &user.email,
                        &user.password_hash,
                        &user.phone,
                        &user.federated_id,
                        user.last_password_change,
                        &user.created_at,
                        &user.updated_at,
                    ],
                )
                .map_err(user_conflict)?;
                Ok(())
            })
            .await
    }

    /// Update profile fields only; credential and lockout columns are untouched
    pub async fn update_profile(&self, user_id: &str, username: &str, phone: Option<&str>) -> Result<()> {
        let user_id = user_id.to_string();
        let username = username.to_string();
        let phone = phone.map(str::to_string);
        self.db
            .execute(move |conn| {
                let changed = conn
                    .execute(
                        "UPDATE users SET username = ?, phone = ?, updated_at = ? WHERE id = ?",
                        params![&username, &phone, timestamp(), &user_id],
                    )
                    .map_err(user_conflict)?;
                if changed == 0 {
                    return Err(RentError::NotFound(format!("User {} not found", user_id)));
                }
                Ok(())
            })
            .await
    }

    /// Record a confirmed password mismatch and return the resulting lockout state
    pub async fn apply_login_failure(
        &self,
        user_id: &str,
        governor: LoginGovernor,
        now: DateTime<Utc>,
    ) -> Result<LockoutState> {
        let user_id = user_id.to_string();
        self.db
            .immediate_transaction(move |tx| {
                let current = tx.query_row(
                    "SELECT failed_login_attempts, account_locked, lockout_until FROM users WHERE id = ?",
                    [&user_id],
                    lockout_of,
                )?;

                let next = governor.on_failure(&current, now);
                if next != current {
                    tx.execute(
                        "UPDATE users SET failed_login_attempts = ?, account_locked = ?, lockout_until = ? \
                         WHERE id = ?",
                        params![
                            next.failed_attempts,
                            next.locked,
                            next.lockout_until.map(|t| t.timestamp_millis()),
                            &user_id
                        ],
                    )?;
                }
                Ok(next)
            })
            .await
    }

    /// Clear lockout state after a correct password, unless a concurrent
    /// attempt locked the account in the meantime
    pub async fn apply_login_success(
        &self,
        user_id: &str,
        governor: LoginGovernor,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let user_id = user_id.to_string();
        self.db
            .immediate_transaction(move |tx| {
                let current = tx.query_row(
                    "SELECT failed_login_attempts, account_locked, lockout_until FROM users WHERE id = ?",
                    [&user_id],
                    lockout_of,
                )?;

                let admission = governor.admit(&current, now);
                if admission == Admission::Allowed {
                    let cleared = governor.on_success();
                    tx.execute(
                        "UPDATE users SET failed_login_attempts = ?, account_locked = ?, lockout_until = NULL, \
                         last_login_at = ? WHERE id = ?",
                        params![cleared.failed_attempts, cleared.locked, now.timestamp_millis(), &user_id],
                    )?;
                }
                Ok(admission)
            })
            .await
    }

    /// Store a new reset ticket, replacing any previous one
    /// Attach a ticket to the account registered under `email`, replacing any
    /// earlier one
    ///
    /// Returns the identity id, or `None` when no account has that email. Both
    /// outcomes cost the same single statement.
    pub async fn store_reset_ticket(
        &self,
        email: &str,
        token_hash: &str,
        expires: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let email = email.to_string();
        let token_hash = token_hash.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE users SET reset_token_hash = ?, reset_expires = ? WHERE email = ? RETURNING id",
                        params![&token_hash, expires.timestamp_millis(), &email],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    /// Consume a live reset ticket and install the new password hash in one statement
    ///
    /// Returns the identity id. Zero matched rows (unknown, expired or already
    /// consumed ticket) is `InvalidOrExpiredTicket`, so of two concurrent
    /// consumers exactly one succeeds.
    pub async fn consume_reset_ticket(
        &self,
        token_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let token_hash = token_hash.to_string();
        let new_password_hash = new_password_hash.to_string();
        let now_ms = now.timestamp_millis();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    "UPDATE users SET password_hash = ?1, reset_token_hash = NULL, reset_expires = NULL, \
                     failed_login_attempts = 0, account_locked = 0, lockout_until = NULL, \
                     last_password_change = MAX(?2, last_password_change + 1), updated_at = ?3 \
                     WHERE reset_token_hash = ?4 AND reset_expires > ?2 \
                     RETURNING id",
                    params![&new_password_hash, now_ms, timestamp(), &token_hash],
                    |row| row.get::<_, String>(0),
                )
                .optional()?
                .ok_or(RentError::InvalidOrExpiredTicket)
            })
            .await
    }

    /// Swap the password hash if it still equals `expected_hash`
    ///
    /// Clears lockout and any outstanding reset ticket, and bumps the version
    /// marker. Returns the new marker, or `None` when the hash changed underneath.
    pub async fn replace_password(
        &self,
        user_id: &str,
        expected_hash: &str,
        new_password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let user_id = user_id.to_string();
        let expected_hash = expected_hash.to_string();
        let new_password_hash = new_password_hash.to_string();
        let now_ms = now.timestamp_millis();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        "UPDATE users SET password_hash = ?1, reset_token_hash = NULL, reset_expires = NULL, \
                         failed_login_attempts = 0, account_locked = 0, lockout_until = NULL, \
                         last_password_change = MAX(?2, last_password_change + 1), updated_at = ?3 \
                         WHERE id = ?4 AND password_hash = ?5 \
                         RETURNING last_password_change",
                        params![&new_password_hash, now_ms, timestamp(), &user_id, &expected_hash],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()?)
            })
            .await
    }
}

const LISTING_COLUMNS: &str = "id, title, location, price, description, image_url, \
     seller_id, seller_username, seller_email, created_at, updated_at";

fn row_to_listing(row: &Row<'_>) -> rusqlite::Result<Listing> {
    Ok(Listing {
        id: row.get(0)?,
        title: row.get(1)?,
        location: row.get(2)?,
        price: row.get(3)?,
        description: row.get(4)?,
        image_url: row.get(5)?,
        seller: Seller {
            id: row.get(6)?,
            username: row.get(7)?,
            email: row.get(8)?,
        },
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Repository for house listings
pub struct ListingRepository {
    db: Arc<DatabaseManager>,
}

impl ListingRepository {
    /// Create a new ListingRepository
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Listings created by one seller, newest first
    pub async fn find_by_seller(&self, seller_id: &str) -> Result<Vec<Listing>> {
        let seller_id = seller_id.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!(
                    "SELECT {} FROM listings WHERE seller_id = ? ORDER BY created_at DESC, rowid DESC",
                    LISTING_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let listings = stmt
                    .query_map([&seller_id], row_to_listing)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(listings)
            })
            .await
    }
}

#[async_trait]
impl Repository<Listing> for ListingRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Listing>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let sql = format!("SELECT {} FROM listings WHERE id = ?", LISTING_COLUMNS);
                Ok(conn.query_row(&sql, [&id], row_to_listing).optional()?)
            })
            .await
    }

    async fn find_all(&self) -> Result<Vec<Listing>> {
        self.db
            .execute(|conn| {
                let sql = format!(
                    "SELECT {} FROM listings ORDER BY created_at DESC, rowid DESC",
                    LISTING_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let listings = stmt
                    .query_map([], row_to_listing)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(listings)
            })
            .await
    }

    async fn create(&self, listing: &Listing) -> Result<()> {
        let listing = listing.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO listings (id, title, location, price, description, image_url, \
                     seller_id, seller_username, seller_email, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        &listing.id,
                        &listing.title,
                        &listing.location,
                        listing.price,
                        &listing.description,
                        &listing.image_url,
                        &listing.seller.id,
                        &listing.seller.username,
                        &listing.seller.email,
                        &listing.created_at,
                        &listing.updated_at,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    /// Seller columns are deliberately absent from the SET list
    async fn update(&self, listing: &Listing) -> Result<()> {
        let listing = listing.clone();
        self.db
            .execute(move |conn| {
                let changed = conn.execute(
                    "UPDATE listings SET title = ?, location = ?, price = ?, description = ?, \
                     image_url = ?, updated_at = ? WHERE id = ?",
                    params![
                        &listing.title,
                        &listing.location,
                        listing.price,
                        &listing.description,
                        &listing.image_url,
                        &listing.updated_at,
                        &listing.id,
                    ],
                )?;
                if changed == 0 {
                    return Err(RentError::NotFound(format!("Listing {} not found", listing.id)));
                }
                Ok(())
            })
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let changed = conn.execute("DELETE FROM listings WHERE id = ?", [&id])?;
                if changed == 0 {
                    return Err(RentError::NotFound(format!("Listing {} not found", id)));
                }
                Ok(())
            })
            .await
    }
}
