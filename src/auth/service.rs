//! Authentication flows
//!
//! Every operation takes `now` explicitly; handlers pass `Utc::now()` and tests
//! pass whatever instant the scenario needs.

use crate::auth::governor::{Admission, LoginGovernor};
use crate::auth::jwt::{IssuedToken, SessionClaims, TokenService};
use crate::auth::password::PasswordHasher;
use crate::auth::policy::{normalize_email, validate_password, Registration};
use crate::auth::renewal::RenewalPolicy;
use crate::auth::reset::{LogResetNotifier, ResetNotifier, ResetTickets};
use crate::core::config::AuthConfig;
use crate::core::error::{Result, RentError};
use crate::db::models::User;
use crate::db::repository::UserRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "Invalid credentials";
const WRONG_CURRENT_PASSWORD: &str = "Current password is incorrect";
const SESSION_INVALID: &str = "Session is no longer valid, please log in again";
const PASSWORD_REUSED: &str = "New password must be different from the current password";

/// Generic answer to forgot-password, identical whether or not the account exists
pub const RESET_REQUESTED_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub session: IssuedToken,
}

pub struct AuthService {
    users: Arc<UserRepository>,
    hasher: PasswordHasher,
    tokens: TokenService,
    renewal: RenewalPolicy,
    governor: LoginGovernor,
    tickets: ResetTickets,
    notifier: Arc<dyn ResetNotifier>,
    expose_reset_token: bool,
    /// Compared against when the account does not exist, so both paths pay for one bcrypt verify
    dummy_hash: String,
}

impl AuthService {
    pub fn new(users: Arc<UserRepository>, jwt_secret: &str, config: &AuthConfig) -> Result<Self> {
        let hasher = PasswordHasher::new(config.bcrypt_cost);
        let dummy_hash = hasher.hash(&Uuid::new_v4().to_string())?;

        Ok(Self {
            users,
            hasher,
            tokens: TokenService::new(jwt_secret, config.token_ttl()),
            renewal: RenewalPolicy::new(config.token_ttl(), config.renewal_threshold),
            governor: LoginGovernor::new(config.lockout_threshold, config.lockout_duration()),
            tickets: ResetTickets::new(config.reset_ticket_ttl()),
            notifier: Arc::new(LogResetNotifier),
            expose_reset_token: config.expose_reset_token,
            dummy_hash,
        })
    }

    /// Replace the default log-only reset delivery
    pub fn with_notifier(mut self, notifier: Arc<dyn ResetNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Create a local-password identity and return its id
    pub async fn register(&self, registration: Registration, now: DateTime<Utc>) -> Result<String> {
        let password_hash = self.hasher.hash_async(&registration.password).await?;
        let timestamp = now.to_rfc3339();

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: registration.username,
            email: registration.email,
            password_hash: Some(password_hash),
            phone: registration.phone,
            federated_id: None,
            failed_login_attempts: 0,
            account_locked: false,
            lockout_until: None,
            last_password_change: now.timestamp_millis(),
            last_login_at: None,
            reset_token_hash: None,
            reset_expires: None,
            created_at: timestamp.clone(),
            updated_at: timestamp,
        };

        self.users.create(&user).await?;
        tracing::info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(user.id)
    }

    pub async fn login(&self, email: &str, password: &str, now: DateTime<Utc>) -> Result<LoginOutcome> {
        let email = normalize_email(email);
        if email.is_empty() || password.is_empty() {
            return Err(RentError::ValidationError("Email and password are required".to_string()));
        }

        let user = match self.users.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.hasher.verify_async(password, &self.dummy_hash).await?;
                tracing::warn!(reason = "unknown_account", "Login failed");
                return Err(RentError::AuthenticationError(INVALID_CREDENTIALS.to_string()));
            }
        };

        if let Admission::Locked { until } = self.governor.admit(&user.lockout_state(), now) {
            tracing::warn!(user_id = %user.id, lockout_until = %until.to_rfc3339(), "Login attempt on locked account");
            return Err(RentError::AccountLocked { until });
        }

        let Some(stored_hash) = user.password_hash.as_deref() else {
            self.hasher.verify_async(password, &self.dummy_hash).await?;
            tracing::warn!(user_id = %user.id, reason = "no_local_password", "Login failed");
            return Err(RentError::AuthenticationError(INVALID_CREDENTIALS.to_string()));
        };

        if !self.hasher.verify_async(password, stored_hash).await? {
            let state = self.users.apply_login_failure(&user.id, self.governor, now).await?;
            if state.locked {
                tracing::warn!(
                    user_id = %user.id,
                    failed_attempts = state.failed_attempts,
                    "Account locked after repeated failed logins"
                );
            } else {
                tracing::warn!(
                    user_id = %user.id,
                    reason = "wrong_password",
                    failed_attempts = state.failed_attempts,
                    "Login failed"
                );
            }
            return Err(RentError::AuthenticationError(INVALID_CREDENTIALS.to_string()));
        }

        // A concurrent attempt may have locked the account while we were hashing
        if let Admission::Locked { until } = self.users.apply_login_success(&user.id, self.governor, now).await? {
            return Err(RentError::AccountLocked { until });
        }

        let session = self.tokens.issue(&user.id, &user.email, user.last_password_change, now)?;
        tracing::info!(user_id = %user.id, "Login successful");

        Ok(LoginOutcome { user, session })
    }

    /// Issue a reset ticket if the account exists
    ///
    /// Returns the raw secret only when `expose_reset_token` is enabled.
    pub async fn request_reset(&self, email: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(RentError::ValidationError("Email is required".to_string()));
        }

        // Known and unknown emails run the same statement; only a match is delivered
        let ticket = self.tickets.generate(now);
        let Some(user_id) = self
            .users
            .store_reset_ticket(&email, &ticket.digest, ticket.expires_at)
            .await?
        else {
            tracing::info!(reason = "unknown_account", "Password reset requested");
            return Ok(None);
        };

        // Delivered off the request path; response time must not depend on the notifier
        let notifier = self.notifier.clone();
        let delivery = ticket.clone();
        let (recipient_id, recipient) = (user_id.clone(), email.clone());
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(&recipient_id, &recipient, &delivery).await {
                tracing::error!(user_id = %recipient_id, error = %e, "Failed to deliver password reset ticket");
            }
        });

        if self.expose_reset_token {
            tracing::warn!(
                user_id = %user_id,
                "Returning raw reset token in the response; expose_reset_token must be disabled in production"
            );
            return Ok(Some(ticket.secret));
        }

        Ok(None)
    }

    pub async fn consume_reset(&self, secret: &str, new_password: &str, now: DateTime<Utc>) -> Result<()> {
        if secret.trim().is_empty() || new_password.is_empty() {
            return Err(RentError::ValidationError(
                "Reset token and new password are required".to_string(),
            ));
        }
        validate_password(new_password)?;

        let digest = ResetTickets::digest(secret);
        let Some(user) = self.users.find_by_reset_token(&digest, now).await? else {
            tracing::warn!(reason = "unknown_or_expired_ticket", "Password reset rejected");
            return Err(RentError::InvalidOrExpiredTicket);
        };

        if let Some(current) = user.password_hash.as_deref() {
            if self.hasher.verify_async(new_password, current).await? {
                return Err(RentError::ValidationError(PASSWORD_REUSED.to_string()));
            }
        }

        let new_hash = self.hasher.hash_async(new_password).await?;
        let user_id = self.users.consume_reset_ticket(&digest, &new_hash, now).await?;
        tracing::info!(user_id = %user_id, "Password reset completed");
        Ok(())
    }

    /// Change the password of an authenticated identity and mint a token for the new version
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        if current_password.is_empty() || new_password.is_empty() {
            return Err(RentError::ValidationError(
                "Current password and new password are required".to_string(),
            ));
        }

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| RentError::NotFound("User not found".to_string()))?;

        let Some(stored_hash) = user.password_hash.as_deref() else {
            return Err(RentError::AuthenticationError(WRONG_CURRENT_PASSWORD.to_string()));
        };

        if !self.hasher.verify_async(current_password, stored_hash).await? {
            tracing::warn!(user_id = %user.id, "Password change rejected: wrong current password");
            return Err(RentError::AuthenticationError(WRONG_CURRENT_PASSWORD.to_string()));
        }

        validate_password(new_password)?;
        if self.hasher.verify_async(new_password, stored_hash).await? {
            return Err(RentError::ValidationError(PASSWORD_REUSED.to_string()));
        }

        let new_hash = self.hasher.hash_async(new_password).await?;
        let version = self
            .users
            .replace_password(&user.id, stored_hash, &new_hash, now)
            .await?
            .ok_or_else(|| RentError::AuthenticationError(WRONG_CURRENT_PASSWORD.to_string()))?;

        tracing::info!(user_id = %user.id, "Password changed");
        self.tokens.issue(&user.id, &user.email, version, now)
    }

    /// Verify a bearer token and load the identity it names
    ///
    /// Tokens minted before the latest password change are rejected.
    pub async fn authenticate(&self, token: &str, now: DateTime<Utc>) -> Result<(User, SessionClaims)> {
        let claims = self.tokens.verify(token, now).map_err(|e| {
            tracing::debug!(reason = %e, "Bearer token rejected");
            RentError::from(e)
        })?;

        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or_else(|| RentError::AuthenticationError(SESSION_INVALID.to_string()))?;

        if claims.ver != user.last_password_change {
            tracing::info!(user_id = %user.id, "Token predates the last password change");
            return Err(RentError::AuthenticationError(SESSION_INVALID.to_string()));
        }

        Ok((user, claims))
    }

    /// Replacement token for an aging session, if one is due
    pub fn renew(&self, user: &User, claims: &SessionClaims, now: DateTime<Utc>) -> Result<Option<IssuedToken>> {
        if !self.renewal.should_renew(claims, now) {
            return Ok(None);
        }
        self.tokens
            .issue(&user.id, &user.email, user.last_password_change, now)
            .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::reset::ResetTicket;
    use crate::db::manager::DatabaseManager;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Captures delivered secrets instead of sending them anywhere
    #[derive(Default)]
    struct CapturingNotifier {
        secrets: Mutex<Vec<String>>,
    }

    impl CapturingNotifier {
        /// Wait for the background delivery, then return the newest secret
        async fn last(&self) -> String {
            for _ in 0..100 {
                let latest = self.secrets.lock().unwrap().last().cloned();
                if let Some(secret) = latest {
                    return secret;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            panic!("no reset ticket was delivered");
        }
    }

    /// Takes far longer than any request should
    struct SlowNotifier;

    #[async_trait]
    impl ResetNotifier for SlowNotifier {
        async fn deliver(&self, _user_id: &str, _email: &str, _ticket: &ResetTicket) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[async_trait]
    impl ResetNotifier for CapturingNotifier {
        async fn deliver(&self, _user_id: &str, _email: &str, ticket: &ResetTicket) -> Result<()> {
            self.secrets.lock().unwrap().push(ticket.secret.clone());
            Ok(())
        }
    }

    fn config() -> AuthConfig {
        AuthConfig {
            bcrypt_cost: 4,
            ..AuthConfig::default()
        }
    }

    fn service() -> (AuthService, Arc<CapturingNotifier>) {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let users = Arc::new(UserRepository::new(db));
        let notifier = Arc::new(CapturingNotifier::default());
        let service = AuthService::new(users, "test-secret", &config())
            .unwrap()
            .with_notifier(notifier.clone());
        (service, notifier)
    }

    fn alice() -> Registration {
        Registration::parse("alice", "a@x.com", "Str0ng!Pass", None).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (auth, _) = service();
        let now = Utc::now();
        let id = auth.register(alice(), now).await.unwrap();

        let outcome = auth.login("A@X.com ", "Str0ng!Pass", now).await.unwrap();
        assert_eq!(outcome.user.id, id);
        assert_eq!(outcome.session.claims.ver, now.timestamp_millis());

        let (user, _) = auth.authenticate(&outcome.session.token, now).await.unwrap();
        assert_eq!(user.id, id);
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let (auth, _) = service();
        auth.register(alice(), Utc::now()).await.unwrap();
        assert!(matches!(
            auth.register(alice(), Utc::now()).await,
            Err(RentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_account_and_wrong_password_look_the_same() {
        let (auth, _) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();

        let unknown = auth.login("b@x.com", "Str0ng!Pass", now).await.unwrap_err();
        let wrong = auth.login("a@x.com", "wrong", now).await.unwrap_err();
        assert_eq!(unknown.public_message(), wrong.public_message());
        assert_eq!(unknown.status_code(), wrong.status_code());
    }

    #[tokio::test]
    async fn test_lockout_after_five_failures_and_recovery() {
        let (auth, _) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();

        for _ in 0..5 {
            let err = auth.login("a@x.com", "wrong", now).await.unwrap_err();
            assert!(matches!(err, RentError::AuthenticationError(_)));
        }

        let locked = auth.login("a@x.com", "Str0ng!Pass", now).await.unwrap_err();
        assert!(matches!(locked, RentError::AccountLocked { .. }));

        let later = now + Duration::minutes(31);
        let outcome = auth.login("a@x.com", "Str0ng!Pass", later).await.unwrap();
        assert_eq!(outcome.user.id, outcome.session.claims.sub);

        // Counter restarted: four more failures do not lock
        for _ in 0..4 {
            auth.login("a@x.com", "wrong", later).await.unwrap_err();
        }
        assert!(auth.login("a@x.com", "Str0ng!Pass", later).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_flow_is_single_use_and_invalidates_tokens() {
        let (auth, notifier) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();
        let old = auth.login("a@x.com", "Str0ng!Pass", now).await.unwrap();

        assert_eq!(auth.request_reset("a@x.com", now).await.unwrap(), None);
        let secret = notifier.last().await;

        let later = now + Duration::seconds(5);
        auth.consume_reset(&secret, "N3w!Password", later).await.unwrap();
        assert!(matches!(
            auth.consume_reset(&secret, "An0ther!Pass", later).await,
            Err(RentError::InvalidOrExpiredTicket)
        ));

        assert!(auth.authenticate(&old.session.token, later).await.is_err());
        assert!(auth.login("a@x.com", "Str0ng!Pass", later).await.is_err());
        assert!(auth.login("a@x.com", "N3w!Password", later).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_rejects_reuse_and_expired_ticket() {
        let (auth, notifier) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();

        auth.request_reset("a@x.com", now).await.unwrap();
        let secret = notifier.last().await;

        assert!(matches!(
            auth.consume_reset(&secret, "Str0ng!Pass", now).await,
            Err(RentError::ValidationError(ref m)) if m == PASSWORD_REUSED
        ));
        assert!(matches!(
            auth.consume_reset(&secret, "N3w!Password", now + Duration::minutes(61)).await,
            Err(RentError::InvalidOrExpiredTicket)
        ));
        assert!(matches!(
            auth.consume_reset("wrong-secret", "N3w!Password", now).await,
            Err(RentError::InvalidOrExpiredTicket)
        ));
    }

    #[tokio::test]
    async fn test_reset_unlocks_account() {
        let (auth, notifier) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();
        for _ in 0..5 {
            auth.login("a@x.com", "wrong", now).await.unwrap_err();
        }

        auth.request_reset("a@x.com", now).await.unwrap();
        auth.consume_reset(&notifier.last().await, "N3w!Password", now).await.unwrap();
        assert!(auth.login("a@x.com", "N3w!Password", now).await.is_ok());
    }

    #[tokio::test]
    async fn test_reset_for_unknown_email_is_silent() {
        let (auth, notifier) = service();
        assert_eq!(auth.request_reset("nobody@x.com", Utc::now()).await.unwrap(), None);
        assert!(notifier.secrets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_answer_does_not_wait_for_delivery() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let users = Arc::new(UserRepository::new(db));
        let auth = AuthService::new(users.clone(), "test-secret", &config())
            .unwrap()
            .with_notifier(Arc::new(SlowNotifier));
        let now = Utc::now();
        let id = auth.register(alice(), now).await.unwrap();

        let budget = std::time::Duration::from_secs(1);
        let known = tokio::time::timeout(budget, auth.request_reset("a@x.com", now)).await;
        let unknown = tokio::time::timeout(budget, auth.request_reset("nobody@x.com", now)).await;
        assert_eq!(known.unwrap().unwrap(), None);
        assert_eq!(unknown.unwrap().unwrap(), None);

        // The ticket is stored even though delivery is still running
        let stored = users.find_by_id(&id).await.unwrap().unwrap();
        assert!(stored.reset_token_hash.is_some());
    }

    #[tokio::test]
    async fn test_passwords_beyond_bcrypt_limit() {
        let (auth, _) = service();
        let now = Utc::now();
        let original = format!("Aa1!{}", "x".repeat(68));
        auth.register(Registration::parse("alice", "a@x.com", &original, None).unwrap(), now)
            .await
            .unwrap();

        let extended = format!("{}DIFFERENT", original);
        assert!(matches!(
            auth.login("a@x.com", &extended, now).await,
            Err(RentError::AuthenticationError(_))
        ));
        let outcome = auth.login("a@x.com", &original, now).await.unwrap();

        let too_long = format!("{}Changed", original);
        assert!(matches!(
            auth.change_password(&outcome.user.id, &original, &too_long, now).await,
            Err(RentError::ValidationError(ref m)) if m.contains("72 bytes")
        ));

        // Differs only in the last byte bcrypt reads
        let replacement = format!("{}y", &original[..71]);
        auth.change_password(&outcome.user.id, &original, &replacement, now)
            .await
            .unwrap();
        assert!(auth.login("a@x.com", &replacement, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_exposed_reset_token_is_returned() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let users = Arc::new(UserRepository::new(db));
        let config = AuthConfig {
            expose_reset_token: true,
            ..config()
        };
        let auth = AuthService::new(users, "test-secret", &config).unwrap();
        auth.register(alice(), Utc::now()).await.unwrap();

        let secret = auth.request_reset("a@x.com", Utc::now()).await.unwrap().unwrap();
        auth.consume_reset(&secret, "N3w!Password", Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_change_password() {
        let (auth, _) = service();
        let now = Utc::now();
        let id = auth.register(alice(), now).await.unwrap();
        let old = auth.login("a@x.com", "Str0ng!Pass", now).await.unwrap();

        assert!(matches!(
            auth.change_password(&id, "wrong", "N3w!Password", now).await,
            Err(RentError::AuthenticationError(_))
        ));
        assert!(matches!(
            auth.change_password(&id, "Str0ng!Pass", "Str0ng!Pass", now).await,
            Err(RentError::ValidationError(_))
        ));
        assert!(matches!(
            auth.change_password(&id, "Str0ng!Pass", "weak", now).await,
            Err(RentError::ValidationError(_))
        ));
        assert!(matches!(
            auth.change_password("missing", "Str0ng!Pass", "N3w!Password", now).await,
            Err(RentError::NotFound(_))
        ));

        let fresh = auth.change_password(&id, "Str0ng!Pass", "N3w!Password", now).await.unwrap();
        assert!(fresh.claims.ver > old.session.claims.ver);
        assert!(auth.authenticate(&old.session.token, now).await.is_err());
        assert!(auth.authenticate(&fresh.token, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_renewal_only_near_expiry() {
        let (auth, _) = service();
        let now = Utc::now();
        auth.register(alice(), now).await.unwrap();
        let outcome = auth.login("a@x.com", "Str0ng!Pass", now).await.unwrap();
        let (user, claims) = auth.authenticate(&outcome.session.token, now).await.unwrap();

        assert!(auth.renew(&user, &claims, now).unwrap().is_none());

        let late = now + Duration::seconds(3400);
        let renewed = auth.renew(&user, &claims, late).unwrap().unwrap();
        assert_eq!(renewed.claims.ver, claims.ver);
        assert!(renewed.claims.exp > claims.exp);

        let expired = now + Duration::seconds(3600);
        assert!(auth.authenticate(&outcome.session.token, expired).await.is_err());
    }
}
