//! Input rules for registration and password changes

use crate::auth::password::MAX_PASSWORD_BYTES;
use crate::core::error::{Result, RentError};
use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Punctuation accepted as the required symbol class
pub const PASSWORD_SYMBOLS: &str = "!@#$%^&*()_+-=[]{};':\"\\|,.<>/?`~";

const WEAK_PASSWORD_MESSAGE: &str = "Password must be at least 8 characters and include an uppercase letter, \
     a lowercase letter, a digit and a symbol";

lazy_static! {
    static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.\-]{3,30}$").unwrap();
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[0-9]{7,15}$").unwrap();
}

pub fn is_strong_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LENGTH
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SYMBOLS.contains(c))
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(RentError::ValidationError("Password is required".to_string()));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(RentError::ValidationError(format!(
            "Password must be at most {} bytes",
            MAX_PASSWORD_BYTES
        )));
    }
    if !is_strong_password(password) {
        return Err(RentError::ValidationError(WEAK_PASSWORD_MESSAGE.to_string()));
    }
    Ok(())
}

/// Trim and lowercase; emails are compared in this form everywhere
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(RentError::ValidationError("Email is required".to_string()));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(RentError::ValidationError("Email address is not valid".to_string()));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<()> {
    if username.is_empty() {
        return Err(RentError::ValidationError("Username is required".to_string()));
    }
    if !USERNAME_RE.is_match(username) {
        return Err(RentError::ValidationError(
            "Username must be 3-30 characters of letters, digits, '_', '.' or '-'".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_phone(phone: &str) -> Result<()> {
    if !PHONE_RE.is_match(phone) {
        return Err(RentError::ValidationError(
            "Phone number must be 7-15 digits with an optional leading '+'".to_string(),
        ));
    }
    Ok(())
}

/// Registration input after normalisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

impl Registration {
    /// Normalise and validate raw registration fields
    ///
    /// An empty phone is treated as absent.
    pub fn parse(username: &str, email: &str, password: &str, phone: Option<&str>) -> Result<Self> {
        let username = username.trim().to_string();
        let email = normalize_email(email);
        let phone = phone.map(str::trim).filter(|p| !p.is_empty()).map(str::to_string);

        validate_username(&username)?;
        validate_email(&email)?;
        validate_password(password)?;
        if let Some(phone) = &phone {
            validate_phone(phone)?;
        }

        Ok(Self {
            username,
            email,
            password: password.to_string(),
            phone,
        })
    }
}
