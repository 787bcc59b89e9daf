//! Configuration management

use clap::Parser;
use config::builder::{ConfigBuilder as Builder, DefaultState};
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Placeholder secret shipped in the defaults; startup warns when it is still in use
pub const PLACEHOLDER_JWT_SECRET: &str = "change-this-secret-in-production";

/// Upper bound for `auth.token_ttl` (one year)
pub const MAX_TOKEN_TTL: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid database configuration: {0}")]
    InvalidDatabase(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid security configuration: {0}")]
    InvalidSecurity(String),

    #[error("Invalid auth configuration: {0}")]
    InvalidAuth(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();

        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(config_path.display().to_string()));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables are prefixed with RENT_ and use __ for nesting
        // Example: RENT_AUTH__BCRYPT_COST=12
        builder = builder.add_source(
            Environment::with_prefix("RENT")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(db_path) = &cli_args.database {
            builder = builder.set_override("database.path", db_path.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path, on top of the defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults only; no file, environment or CLI input
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.security.validate()?;
        self.auth.validate()?;
        self.rate_limit.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 5050)?
        .set_default("server.request_timeout", 30)?
        .set_default("database.path", "./data/rent-kenya.db")?
        .set_default("database.connection_pool_size", 10)?
        .set_default("database.busy_timeout", 5000)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "json")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)? // 10 MB
        .set_default("logging.max_backups", 5)?
        .set_default("security.jwt_secret", PLACEHOLDER_JWT_SECRET)?
        .set_default("security.allowed_origins", vec!["*"])?
        .set_default("security.enable_hsts", false)?
        .set_default("security.hsts_max_age", 31536000)?
        .set_default("auth.bcrypt_cost", 12)?
        .set_default("auth.token_ttl", 3600)?
        .set_default("auth.renewal_threshold", 0.9167)?
        .set_default("auth.lockout_threshold", 5)?
        .set_default("auth.lockout_duration", 1800)?
        .set_default("auth.reset_ticket_ttl", 3600)?
        .set_default("auth.expose_reset_token", false)?
        .set_default("rate_limit.login_requests", 20)?
        .set_default("rate_limit.login_window", 900)?
        .set_default("rate_limit.register_requests", 5)?
        .set_default("rate_limit.register_window", 3600)?
        .set_default("rate_limit.reset_requests", 5)?
        .set_default("rate_limit.reset_window", 3600)?
        .set_default("rate_limit.trust_proxy_headers", false)?)
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "rent-kenya")]
#[command(about = "Rent Kenya listings API server", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML format)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host address
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Database file path
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64, // seconds
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".to_string()));
        }

        if self.port == 0 {
            return Err(ConfigError::InvalidServer("port must be greater than 0".to_string()));
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidServer(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub connection_pool_size: usize,
    pub busy_timeout: u64, // milliseconds
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidDatabase("path cannot be empty".to_string()));
        }

        if self.connection_pool_size == 0 {
            return Err(ConfigError::InvalidDatabase(
                "connection_pool_size must be greater than 0".to_string(),
            ));
        }

        if self.busy_timeout == 0 {
            return Err(ConfigError::InvalidDatabase(
                "busy_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize, // bytes
    pub max_backups: usize,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "level must be one of: {:?}",
                valid_levels
            )));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "format must be one of: {:?}",
                valid_formats
            )));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(format!(
                "output must be one of: {:?}",
                valid_outputs
            )));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string(),
            ));
        }

        if self.max_file_size == 0 || self.max_backups == 0 {
            return Err(ConfigError::InvalidLogging(
                "max_file_size and max_backups must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub allowed_origins: Vec<String>,
    pub enable_hsts: bool,
    pub hsts_max_age: u64, // seconds
}

impl SecurityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::InvalidSecurity("jwt_secret cannot be empty".to_string()));
        }

        if self.allowed_origins.is_empty() {
            return Err(ConfigError::InvalidSecurity(
                "allowed_origins cannot be empty".to_string(),
            ));
        }

        if self.enable_hsts && self.hsts_max_age == 0 {
            return Err(ConfigError::InvalidSecurity(
                "hsts_max_age must be greater than 0 when enable_hsts is true".to_string(),
            ));
        }

        Ok(())
    }

    /// True while the shipped placeholder secret is still configured
    pub fn uses_placeholder_secret(&self) -> bool {
        self.jwt_secret == PLACEHOLDER_JWT_SECRET
    }
}

/// Tunables for the authentication core
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// bcrypt work factor
    pub bcrypt_cost: u32,
    /// Session token lifetime in seconds
    pub token_ttl: u64,
    /// Fraction of `token_ttl` after which a presented token is renewed
    pub renewal_threshold: f64,
    /// Consecutive failed logins that lock an account
    pub lockout_threshold: u32,
    /// Lockout length in seconds
    pub lockout_duration: u64,
    /// Reset ticket lifetime in seconds
    pub reset_ticket_ttl: u64,
    /// Development only: return the raw reset secret from forgot-password
    pub expose_reset_token: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bcrypt_cost: 12,
            token_ttl: 3600,
            renewal_threshold: 0.9167,
            lockout_threshold: 5,
            lockout_duration: 1800,
            reset_ticket_ttl: 3600,
            expose_reset_token: false,
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(ConfigError::InvalidAuth("bcrypt_cost must be between 4 and 31".to_string()));
        }

        if self.token_ttl == 0 || self.token_ttl > MAX_TOKEN_TTL {
            return Err(ConfigError::InvalidAuth(format!(
                "token_ttl must be between 1 and {} seconds",
                MAX_TOKEN_TTL
            )));
        }

        if !(self.renewal_threshold > 0.0 && self.renewal_threshold < 1.0) {
            return Err(ConfigError::InvalidAuth(
                "renewal_threshold must be a fraction between 0 and 1".to_string(),
            ));
        }

        if self.lockout_threshold == 0 || self.lockout_duration == 0 {
            return Err(ConfigError::InvalidAuth(
                "lockout_threshold and lockout_duration must be greater than 0".to_string(),
            ));
        }

        if self.reset_ticket_ttl == 0 {
            return Err(ConfigError::InvalidAuth(
                "reset_ticket_ttl must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }

    pub fn lockout_duration(&self) -> Duration {
        Duration::from_secs(self.lockout_duration)
    }

    pub fn reset_ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_ticket_ttl)
    }
}

/// Per-client request budgets for the sensitive public endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_requests: usize,
    pub login_window: u64, // seconds
    pub register_requests: usize,
    pub register_window: u64, // seconds
    pub reset_requests: usize,
    pub reset_window: u64, // seconds
    /// Key clients on `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer; enable only behind a proxy that overwrites those headers
    pub trust_proxy_headers: bool,
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let budgets = [
            ("login", self.login_requests, self.login_window),
            ("register", self.register_requests, self.register_window),
            ("reset", self.reset_requests, self.reset_window),
        ];

        for (name, requests, window) in budgets {
            if requests == 0 || window == 0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{} requests and window must be greater than 0",
                    name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::defaults().unwrap();

        assert_eq!(config.server.port, 5050);
        assert_eq!(config.auth.bcrypt_cost, 12);
        assert_eq!(config.auth.token_ttl, 3600);
        assert_eq!(config.auth.lockout_threshold, 5);
        assert_eq!(config.auth.lockout_duration, 1800);
        assert!(!config.auth.expose_reset_token);
        assert_eq!(config.rate_limit.login_window, 900);
        assert!(!config.rate_limit.trust_proxy_headers);
        assert!(config.security.uses_placeholder_secret());
    }

    #[test]
    fn test_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[security]\njwt_secret = \"file-secret\"\n\n[auth]\nbcrypt_cost = 10\ntoken_ttl = 86400"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.security.jwt_secret, "file-secret");
        assert_eq!(config.auth.bcrypt_cost, 10);
        assert_eq!(config.auth.token_ttl, 86400);
        assert_eq!(config.auth.lockout_threshold, 5);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_auth_validation() {
        let mut auth = AuthConfig::default();
        assert!(auth.validate().is_ok());

        auth.bcrypt_cost = 3;
        assert!(auth.validate().is_err());

        auth = AuthConfig::default();
        auth.renewal_threshold = 1.0;
        assert!(auth.validate().is_err());

        auth = AuthConfig::default();
        auth.lockout_threshold = 0;
        assert!(auth.validate().is_err());

        auth = AuthConfig::default();
        auth.token_ttl = MAX_TOKEN_TTL;
        assert!(auth.validate().is_ok());
        auth.token_ttl = u64::MAX;
        assert!(auth.validate().is_err());
    }

    #[test]
    fn test_security_rejects_empty_secret() {
        let security = SecurityConfig {
            jwt_secret: "  ".to_string(),
            allowed_origins: vec!["*".to_string()],
            enable_hsts: false,
            hsts_max_age: 0,
        };
        assert!(matches!(security.validate(), Err(ConfigError::InvalidSecurity(_))));
    }
}
