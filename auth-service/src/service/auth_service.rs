//! # Authentication service
//!
//! Implements every core authentication operation: `register`,
//! `login`, `refresh`, `logout`, `validate_token`, `oauth_login`, the
//! OAuth account linking helper, and the admin CRUD surface. Composes the
//! token service, revocation set, rate limiter, and brute-force protector
//! behind the `UserRepository`.
//!
//! ## Error flattening at the trust boundary
//!
//! `AlyxError::UserNotFound` and `AlyxError::InvalidCredentials` stay
//! distinct variants throughout the repository and password-check paths
//! so the failure can still be logged precisely; [`AuthService::login`]
//! is the one place that maps an unknown email to the same
//! `InvalidCredentials` a wrong password produces, so a user-not-found
//! error is indistinguishable to the caller from a bad-password error.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use shared::errors::{AlyxError, AlyxResult};
use shared::validation::{valid_sort_direction, valid_sort_field, validate_pagination};
use tracing::warn;
use uuid::Uuid;

use shared::config::OAuthConfig;

use crate::brute_force::BruteForceProtector;
use crate::domain::{Claims, OAuthAccount, Role, Session, TokenPair, User};
use crate::oauth::{self, OAuthUserInfo};
use crate::password::{PasswordHasher, PasswordPolicy};
use crate::rate_limit::RateLimiter;
use crate::repository::user_repository::{ListUsersFilter, UserRepository, USER_SORT_FIELDS};
use crate::revocation::RevocationSet;
use crate::token::{self, TokenService};

/// Fire-and-forget side-effect callbacks. Errors are logged, never
/// propagated to the caller of the primary operation.
pub type SignupHook = Arc<dyn Fn(&User) -> AlyxResult<()> + Send + Sync>;
pub type LoginHook = Arc<dyn Fn(&User) -> AlyxResult<()> + Send + Sync>;
pub type LogoutHook = Arc<dyn Fn(&str) -> AlyxResult<()> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Hooks {
    pub on_signup: Option<SignupHook>,
    pub on_login: Option<LoginHook>,
    pub on_logout: Option<LogoutHook>,
}

fn fire<F: FnOnce() -> AlyxResult<()>>(name: &'static str, f: F) {
    if let Err(err) = f() {
        warn!(hook = name, error = %err, "auth hook failed");
    }
}

/// Config-level knobs that don't belong to any single collaborator.
#[derive(Debug, Clone)]
pub struct AuthServiceOptions {
    /// Self-service `register` is rejected with `RegistrationClosed` once
    /// the store is non-empty, unless this is `true`.
    pub allow_registration_when_users_exist: bool,
    /// `login` rejects an unverified account with `EmailNotVerified`.
    pub require_verification: bool,
}

impl Default for AuthServiceOptions {
    fn default() -> Self {
        Self { allow_registration_when_users_exist: true, require_verification: false }
    }
}

/// Parameters for the admin `ListUsers` operation, already
/// validated against the sort/dir allow-list by the time they reach
/// [`AuthService::list_users`].
#[derive(Debug, Clone, Default)]
pub struct ListUsersParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub sort: Option<String>,
    pub dir: Option<String>,
    pub search: Option<String>,
    pub role: Option<String>,
}

pub struct ListUsersResult {
    pub users: Vec<User>,
    pub total: usize,
}

/// Partial update for the admin `UpdateUser` operation. `None` fields are
/// left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateUserInput {
    pub email: Option<String>,
    pub verified: Option<bool>,
    pub role: Option<Role>,
}

pub struct AuthService {
    repository: UserRepository,
    token_service: Arc<TokenService>,
    password_hasher: Arc<PasswordHasher>,
    password_policy: PasswordPolicy,
    revocation: Arc<RevocationSet>,
    rate_limiter: Arc<RateLimiter>,
    brute_force: Arc<BruteForceProtector>,
    options: AuthServiceOptions,
    hooks: Hooks,
    oauth_config: Arc<OAuthConfig>,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: UserRepository,
        token_service: Arc<TokenService>,
        password_hasher: Arc<PasswordHasher>,
        password_policy: PasswordPolicy,
        revocation: Arc<RevocationSet>,
        rate_limiter: Arc<RateLimiter>,
        brute_force: Arc<BruteForceProtector>,
        options: AuthServiceOptions,
        oauth_config: Arc<OAuthConfig>,
    ) -> Self {
        Self {
            repository,
            token_service,
            password_hasher,
            password_policy,
            revocation,
            rate_limiter,
            brute_force,
            options,
            hooks: Hooks::default(),
            oauth_config,
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    fn normalize_email(email: &str) -> String {
        email.trim().to_ascii_lowercase()
    }

    async fn issue_session_and_tokens(&self, user: &User) -> AlyxResult<TokenPair> {
        let tokens = self.token_service.issue(&user.id, &user.email, user.verified, user.role)?;
        let fingerprint = token::fingerprint(&tokens.refresh_token);
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            refresh_token_hash: fingerprint,
            expires_at: now + ChronoDuration::seconds(self.token_service.refresh_ttl_seconds()),
            created_at: now,
            user_agent: None,
            ip_address: None,
        };
        self.repository.create_session(session).await?;
        Ok(tokens)
    }

    async fn issue_session_and_tokens_with_context(
        &self,
        user: &User,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> AlyxResult<TokenPair> {
        let tokens = self.token_service.issue(&user.id, &user.email, user.verified, user.role)?;
        let fingerprint = token::fingerprint(&tokens.refresh_token);
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            refresh_token_hash: fingerprint,
            expires_at: now + ChronoDuration::seconds(self.token_service.refresh_ttl_seconds()),
            created_at: now,
            user_agent,
            ip_address,
        };
        self.repository.create_session(session).await?;
        Ok(tokens)
    }

    /// Registers a new user.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> AlyxResult<(User, TokenPair)> {
        let email = Self::normalize_email(email);
        let existing_count = self.repository.count_users().await?;

        if existing_count > 0 && !self.options.allow_registration_when_users_exist {
            return Err(AlyxError::RegistrationClosed);
        }

        self.password_policy.validate(password)?;

        if self.repository.find_by_email(&email).await?.is_some() {
            return Err(AlyxError::UserAlreadyExists);
        }

        let hash = self.password_hasher.hash(password)?;
        let now = Utc::now();
        let role = if existing_count == 0 { Role::Admin } else { Role::User };

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            verified: !self.options.require_verification,
            role,
            password_hash: Some(hash),
            created_at: now,
            updated_at: now,
            metadata,
        };

        let created = self.repository.create(user).await?;
        let tokens = self.issue_session_and_tokens(&created).await?;

        if let Some(hook) = &self.hooks.on_signup {
            let hook = hook.clone();
            let user = created.clone();
            fire("on_signup", move || hook(&user));
        }

        Ok((created, tokens))
    }

    /// Authenticates by email and password. Brute-force and rate-limit
    /// admission are gated here since this crate is the one place the
    /// "auth endpoint" — HTTP routing itself is out of scope.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> AlyxResult<(User, TokenPair)> {
        let email = Self::normalize_email(email);

        if let Some(ip) = &ip_address {
            if !self.rate_limiter.allow(ip) {
                return Err(AlyxError::RateLimitExceeded { retry_after_seconds: 0 });
            }
        }

        if let Some(remaining) = self.brute_force.remaining_lockout(&email) {
            return Err(AlyxError::AccountLocked { until: Utc::now() + ChronoDuration::from_std(remaining).unwrap_or_default() });
        }

        let user = match self.repository.find_by_email(&email).await? {
            Some(user) => user,
            None => {
                self.brute_force.record_failed_attempt(&email);
                return Err(AlyxError::InvalidCredentials);
            }
        };

        let Some(hash) = &user.password_hash else {
            // OAuth-only account: no password to check against.
            self.brute_force.record_failed_attempt(&email);
            return Err(AlyxError::InvalidCredentials);
        };

        if !self.password_hasher.verify(password, hash)? {
            self.brute_force.record_failed_attempt(&email);
            return Err(AlyxError::InvalidCredentials);
        }

        if self.options.require_verification && !user.verified {
            return Err(AlyxError::EmailNotVerified);
        }

        self.brute_force.clear_attempts(&email);

        let tokens = self.issue_session_and_tokens_with_context(&user, user_agent, ip_address).await?;

        if let Some(hook) = &self.hooks.on_login {
            let hook = hook.clone();
            let u = user.clone();
            fire("on_login", move || hook(&u));
        }

        Ok((user, tokens))
    }

    /// Rotates the session, invalidating the old
    /// refresh token for reuse.
    pub async fn refresh(&self, refresh_token: &str) -> AlyxResult<(User, TokenPair)> {
        let subject = self.token_service.validate_refresh_token(refresh_token)?;
        let fingerprint = token::fingerprint(refresh_token);

        if self.revocation.is_revoked(&fingerprint) {
            return Err(AlyxError::InvalidToken);
        }

        let session = self.repository.find_session_by_fingerprint(&fingerprint).await?.ok_or(AlyxError::SessionNotFound)?;

        if session.user_id != subject {
            return Err(AlyxError::InvalidToken);
        }

        if Utc::now() > session.expires_at {
            self.repository.delete_session(&session.id).await?;
            return Err(AlyxError::SessionExpired);
        }

        self.repository.delete_session(&session.id).await?;
        self.revocation.revoke(fingerprint, session.expires_at);

        let user = self.repository.find_by_id(&subject).await?.ok_or(AlyxError::UserNotFound)?;
        let tokens = self.issue_session_and_tokens_with_context(&user, session.user_agent, session.ip_address).await?;

        Ok((user, tokens))
    }

    /// Idempotent: an absent session is success.
    pub async fn logout(&self, refresh_token: &str) -> AlyxResult<()> {
        let fingerprint = token::fingerprint(refresh_token);

        if let Some(session) = self.repository.find_session_by_fingerprint(&fingerprint).await? {
            self.repository.delete_session(&session.id).await?;
            self.revocation.revoke(fingerprint, session.expires_at);

            if let Some(hook) = &self.hooks.on_logout {
                let hook = hook.clone();
                let user_id = session.user_id.clone();
                fire("on_logout", move || hook(&user_id));
            }
        }

        Ok(())
    }

    /// Pure delegation to the token service.
    pub fn validate_token(&self, access_token: &str) -> AlyxResult<Claims> {
        self.token_service.validate_access_token(access_token)
    }

    /// Resolves `provider_name` against the configured providers, exchanges
    /// `code` for an access token, fetches the federated profile, and signs
    /// in or links the account — the full callback-endpoint flow.
    /// `ProviderNotFound`/`ProviderNotEnabled` surface here, before any
    /// network call is made.
    pub async fn complete_oauth_login(
        &self,
        provider_name: &str,
        code: &str,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> AlyxResult<(User, TokenPair)> {
        let provider = oauth::resolve_provider(provider_name, &self.oauth_config)?;
        let access_token = provider.exchange_code(code).await?;
        let info = provider.fetch_user_info(&access_token).await?;
        self.oauth_login(info, user_agent, ip_address).await
    }

    /// Signs in or links an account from federated provider user info.
    pub async fn oauth_login(
        &self,
        info: OAuthUserInfo,
        user_agent: Option<String>,
        ip_address: Option<String>,
    ) -> AlyxResult<(User, TokenPair)> {
        if let Some(account) = self.repository.find_oauth_account(&info.provider, &info.provider_user_id).await? {
            let user = self.repository.find_by_id(&account.user_id).await?.ok_or(AlyxError::UserNotFound)?;
            let tokens = self.issue_session_and_tokens_with_context(&user, user_agent, ip_address).await?;
            return Ok((user, tokens));
        }

        let email = info.email.clone().ok_or(AlyxError::EmailRequired)?;
        let email = Self::normalize_email(&email);

        let user = match self.repository.find_by_email(&email).await? {
            Some(existing) => {
                self.link_oauth_account(&existing.id, &info).await?;
                existing
            }
            None => {
                let existing_count = self.repository.count_users().await?;
                let now = Utc::now();
                let user = User {
                    id: Uuid::new_v4().to_string(),
                    email,
                    verified: info.email_verified,
                    role: if existing_count == 0 { Role::Admin } else { Role::User },
                    password_hash: None,
                    created_at: now,
                    updated_at: now,
                    metadata: Default::default(),
                };
                let created = self.repository.create(user).await?;
                self.link_oauth_account(&created.id, &info).await?;
                created
            }
        };

        let tokens = self.issue_session_and_tokens_with_context(&user, user_agent, ip_address).await?;

        if let Some(hook) = &self.hooks.on_login {
            let hook = hook.clone();
            let u = user.clone();
            fire("on_login", move || hook(&u));
        }

        Ok((user, tokens))
    }

    /// Links a federated identity to an existing user. Not part of the
    /// minimal contract, but grounded in the
    /// `AccountAlreadyLinked` error kind already enumerated —
    /// an interactive "connect your GitHub account" flow needs exactly
    /// this, distinct from the implicit linking `oauth_login` performs.
    pub async fn link_oauth_account(&self, user_id: &str, info: &OAuthUserInfo) -> AlyxResult<OAuthAccount> {
        let account = OAuthAccount {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            provider: info.provider.clone(),
            provider_user_id: info.provider_user_id.clone(),
            created_at: Utc::now(),
        };
        self.repository.create_oauth_account(account).await
    }

    // ------------------------------------------------------------------
    // Admin operations
    // ------------------------------------------------------------------

    pub async fn create_user_by_admin(
        &self,
        email: &str,
        password: &str,
        role: Role,
        verified: bool,
        metadata: std::collections::HashMap<String, serde_json::Value>,
    ) -> AlyxResult<User> {
        let email = Self::normalize_email(email);
        self.password_policy.validate(password)?;

        if self.repository.find_by_email(&email).await?.is_some() {
            return Err(AlyxError::UserAlreadyExists);
        }

        let hash = self.password_hasher.hash(password)?;
        let now = Utc::now();
        let user = User { id: Uuid::new_v4().to_string(), email, verified, role, password_hash: Some(hash), created_at: now, updated_at: now, metadata };
        self.repository.create(user).await
    }

    pub async fn update_user(&self, user_id: &str, input: UpdateUserInput) -> AlyxResult<User> {
        let mut patch = shared::store::Row::new();
        if let Some(email) = input.email {
            patch.insert("email".to_string(), serde_json::Value::String(Self::normalize_email(&email)));
        }
        if let Some(verified) = input.verified {
            patch.insert("verified".to_string(), serde_json::Value::Bool(verified));
        }
        if let Some(role) = input.role {
            patch.insert("role".to_string(), serde_json::Value::String(role.as_str().to_string()));
        }
        patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now()).unwrap());

        self.repository.update(user_id, patch).await
    }

    pub async fn delete_user(&self, user_id: &str) -> AlyxResult<()> {
        self.repository.delete(user_id).await
    }

    pub async fn set_password(&self, user_id: &str, new_password: &str) -> AlyxResult<()> {
        self.password_policy.validate(new_password)?;
        let hash = self.password_hasher.hash(new_password)?;

        let mut patch = shared::store::Row::new();
        patch.insert("password_hash".to_string(), serde_json::Value::String(hash));
        patch.insert("updated_at".to_string(), serde_json::to_value(Utc::now()).unwrap());
        self.repository.update(user_id, patch).await?;

        Ok(())
    }

    /// Paginated listing, validated against the allow-list before
    /// the repository ever sees the sort field, default limit 20, max
    /// 100, default sort `created_at desc`.
    pub async fn list_users(&self, params: ListUsersParams) -> AlyxResult<ListUsersResult> {
        let (limit, offset) = validate_pagination(params.limit, params.offset);
        let sort = params.sort.unwrap_or_else(|| "created_at".to_string());
        valid_sort_field(&sort, USER_SORT_FIELDS)?;
        let dir = params.dir.unwrap_or_else(|| "desc".to_string());
        valid_sort_direction(&dir)?;
        let descending = dir.eq_ignore_ascii_case("desc");

        let filter = ListUsersFilter { search: params.search, role: params.role };
        let (users, total) = self.repository.list(limit, offset, &sort, descending, &filter).await?;

        Ok(ListUsersResult { users, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::PasswordHasher;
    use crate::rate_limit::RateLimiter;
    use crate::revocation::RevocationSet;
    use crate::token::TokenService;
    use shared::config::JwtConfig;
    use shared::store::memory::InMemoryStore;
    use std::time::Duration as StdDuration;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            secret: "test_secret_key_minimum_32_characters_long".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 2_592_000,
            issuer: "alyx".to_string(),
            audience: vec!["alyx-api".to_string()],
        }
    }

    fn service() -> AuthService {
        let repo = UserRepository::new(Arc::new(InMemoryStore::new()));
        AuthService::new(
            repo,
            Arc::new(TokenService::new(jwt_config())),
            Arc::new(PasswordHasher::new()),
            PasswordPolicy { min_length: 8, require_upper: true, require_lower: true, require_digit: true, require_special: true },
            Arc::new(RevocationSet::new()),
            Arc::new(RateLimiter::new(1000, StdDuration::from_secs(60))),
            Arc::new(BruteForceProtector::new(5, StdDuration::from_secs(900))),
            AuthServiceOptions::default(),
            Arc::new(OAuthConfig::default()),
        )
    }

    #[tokio::test]
    async fn first_registered_user_becomes_admin() {
        let svc = service();
        let (user, tokens) = svc.register("Alice@Example.com", "SuperSecret1!", Default::default()).await.unwrap();

        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.role, Role::Admin);
        assert!(!tokens.access_token.is_empty());

        let claims = svc.validate_token(&tokens.access_token).unwrap();
        assert_eq!(claims.user_id, user.id);
    }

    #[tokio::test]
    async fn second_registered_user_is_not_admin() {
        let svc = service();
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();
        let (second, _) = svc.register("b@example.com", "SuperSecret1!", Default::default()).await.unwrap();
        assert_eq!(second.role, Role::User);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let svc = service();
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();
        let err = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "USER_ALREADY_EXISTS");
    }

    #[tokio::test]
    async fn weak_password_is_rejected_before_email_check() {
        let svc = service();
        let err = svc.register("a@example.com", "weak", Default::default()).await.unwrap_err();
        assert_eq!(err.error_code(), "PASSWORD_TOO_SHORT");
    }

    #[tokio::test]
    async fn login_succeeds_with_correct_password() {
        let svc = service();
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let (user, _tokens) = svc.login("a@example.com", "SuperSecret1!", None, None).await.unwrap();
        assert_eq!(user.email, "a@example.com");
    }

    #[tokio::test]
    async fn login_fails_identically_for_unknown_user_and_bad_password() {
        let svc = service();
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let unknown = svc.login("nope@example.com", "whatever", None, None).await.unwrap_err();
        let wrong = svc.login("a@example.com", "WrongPass1!", None, None).await.unwrap_err();
        assert_eq!(unknown.error_code(), "INVALID_CREDENTIALS");
        assert_eq!(wrong.error_code(), "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn oauth_only_account_cannot_log_in_with_password() {
        let svc = service();
        let info = OAuthUserInfo {
            provider: "github".to_string(),
            provider_user_id: "1".to_string(),
            email: Some("o@example.com".to_string()),
            email_verified: true,
        };
        svc.oauth_login(info, None, None).await.unwrap();

        let err = svc.login("o@example.com", "anything1!A", None, None).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn refresh_rotates_session_and_invalidates_old_token() {
        let svc = service();
        let (_, tokens) = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let (_, new_tokens) = svc.refresh(&tokens.refresh_token).await.unwrap();
        assert_ne!(new_tokens.refresh_token, tokens.refresh_token);

        let err = svc.refresh(&tokens.refresh_token).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let svc = service();
        let (_, tokens) = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        svc.logout(&tokens.refresh_token).await.unwrap();
        svc.logout(&tokens.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn logout_then_refresh_fails() {
        let svc = service();
        let (_, tokens) = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();
        svc.logout(&tokens.refresh_token).await.unwrap();

        let err = svc.refresh(&tokens.refresh_token).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn oauth_login_links_existing_email_account() {
        let svc = service();
        let (existing, _) = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let info = OAuthUserInfo {
            provider: "github".to_string(),
            provider_user_id: "42".to_string(),
            email: Some("a@example.com".to_string()),
            email_verified: true,
        };
        let (linked, _) = svc.oauth_login(info, None, None).await.unwrap();
        assert_eq!(linked.id, existing.id);
    }

    #[tokio::test]
    async fn oauth_login_without_email_fails() {
        let svc = service();
        let info = OAuthUserInfo { provider: "github".to_string(), provider_user_id: "1".to_string(), email: None, email_verified: false };
        let err = svc.oauth_login(info, None, None).await.unwrap_err();
        assert_eq!(err.error_code(), "EMAIL_REQUIRED");
    }

    #[tokio::test]
    async fn list_users_rejects_unknown_sort_field() {
        let svc = service();
        let err = svc.list_users(ListUsersParams { sort: Some("password_hash".into()), ..Default::default() }).await.unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn list_users_defaults_to_created_at_desc() {
        let svc = service();
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();
        svc.register("b@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let result = svc.list_users(ListUsersParams::default()).await.unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.users[0].email, "b@example.com");
    }

    #[tokio::test]
    async fn admin_set_password_changes_login_credential() {
        let svc = service();
        let (user, _) = svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        svc.set_password(&user.id, "BrandNew1!").await.unwrap();

        assert!(svc.login("a@example.com", "SuperSecret1!", None, None).await.is_err());
        assert!(svc.login("a@example.com", "BrandNew1!", None, None).await.is_ok());
    }

    #[tokio::test]
    async fn brute_force_locks_after_threshold() {
        let repo = UserRepository::new(Arc::new(InMemoryStore::new()));
        let svc = AuthService::new(
            repo,
            Arc::new(TokenService::new(jwt_config())),
            Arc::new(PasswordHasher::new()),
            PasswordPolicy::default(),
            Arc::new(RevocationSet::new()),
            Arc::new(RateLimiter::new(1000, StdDuration::from_secs(60))),
            Arc::new(BruteForceProtector::new(2, StdDuration::from_secs(900))),
            AuthServiceOptions::default(),
            Arc::new(OAuthConfig::default()),
        );
        svc.register("a@example.com", "SuperSecret1!", Default::default()).await.unwrap();

        let _ = svc.login("a@example.com", "wrong", None, None).await;
        let _ = svc.login("a@example.com", "wrong", None, None).await;
        let err = svc.login("a@example.com", "SuperSecret1!", None, None).await.unwrap_err();
        assert_eq!(err.error_code(), "ACCOUNT_LOCKED");
    }
}
