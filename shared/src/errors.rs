//! # Alyx Error Kinds
//!
//! Unified error handling for every core subsystem.
//!
//! ## Design Philosophy
//!
//! There is no HTTP layer in this workspace, so unlike a typical web
//! service's `ApiError`, `AlyxError` carries no status-code mapping.
//! What every caller still needs, whatever transport eventually wraps
//! these crates, is a stable machine-readable code: each variant still
//! exposes one via [`AlyxError::error_code`].
//!
//! ## Error Categories
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         AlyxError Categories                            │
//! ├─────────────────────────┬───────────────────┬────────────────────────────┤
//! │ Authentication           │ Password policy    │ OAuth                      │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ InvalidCredentials       │ PasswordTooShort   │ ProviderNotFound            │
//! │ UserNotFound             │ PasswordNoUppercase│ InvalidState                │
//! │ SessionExpired           │ PasswordNoNumber   │ StateExpired                │
//! │ ExpiredToken             │ ...                │ TokenExchange               │
//! ├─────────────────────────┴───────────────────┴────────────────────────────┤
//! │ Realtime                 │ Scheduler          │ Storage                     │
//! ├─────────────────────────┼───────────────────┼────────────────────────────┤
//! │ CollectionNotFound       │ InvalidCronExpr    │ NotFound                    │
//! │ InvalidFilter            │ AlreadyExecuted    │ PathTraversal               │
//! │ SubscriptionLimitReached │ InvalidTimezone    │ OffsetMismatch              │
//! └─────────────────────────┴───────────────────┴────────────────────────────┘
//! ```
//!
//! ## A note on authentication-error flattening
//!
//! `UserNotFound` and `InvalidCredentials` are deliberately kept as
//! distinct variants here so internal logging can still tell them
//! apart. The requirement that a caller cannot distinguish "unknown
//! user" from "wrong password" is a behavioral contract enforced at
//! the `AuthService::login` call site, not a property of this enum.

use thiserror::Error;

/// Result type alias used throughout the Alyx core crates.
pub type AlyxResult<T> = Result<T, AlyxError>;

/// Semantic error kinds spanning every Alyx core subsystem.
///
/// ## Adding New Variants
///
/// When adding new error kinds:
/// 1. Add the variant with `#[error("...")]` for the message format
/// 2. Update [`AlyxError::error_code`]
/// 3. Update [`AlyxError::is_server_error`] if applicable
/// 4. Add tests
#[derive(Debug, Error)]
pub enum AlyxError {
    // =========================================================================
    // Authentication
    // =========================================================================
    /// Wrong email/password combination, or an unknown user presented as one
    /// by `AuthService::login` to avoid leaking account existence.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No user exists with the given identifier.
    #[error("user not found")]
    UserNotFound,

    /// Registration attempted with an email that is already taken.
    #[error("user already exists")]
    UserAlreadyExists,

    /// Refresh token fingerprint has no matching session.
    #[error("session not found")]
    SessionNotFound,

    /// Session's absolute lifetime has elapsed.
    #[error("session expired")]
    SessionExpired,

    /// Self-service registration is disabled by configuration.
    #[error("registration is closed")]
    RegistrationClosed,

    /// Login attempted before the account's email was verified.
    #[error("email not verified")]
    EmailNotVerified,

    /// Account temporarily locked by the brute-force protector.
    #[error("account locked until {until}")]
    AccountLocked {
        /// When the account will be automatically unlocked.
        until: chrono::DateTime<chrono::Utc>,
    },

    /// Client has exceeded the configured rate limit.
    #[error("rate limit exceeded, retry after {retry_after_seconds}s")]
    RateLimitExceeded {
        /// Seconds until the client may retry.
        retry_after_seconds: u64,
    },

    /// Token is malformed or fails structural decoding.
    #[error("invalid token")]
    InvalidToken,

    /// Token's `exp` claim is in the past.
    #[error("token expired")]
    ExpiredToken,

    /// Token's `iss` claim does not match the configured issuer.
    #[error("invalid token issuer")]
    InvalidIssuer,

    /// Token's `aud` claim does not match the configured audience.
    #[error("invalid token audience")]
    InvalidAudience,

    /// Token is missing its `sub` claim.
    #[error("token missing subject claim")]
    MissingSubject,

    /// Token signature does not verify against the configured key.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token has already been revoked (logout, rotation, or admin action).
    #[error("token revoked")]
    TokenRevoked,

    // =========================================================================
    // Password policy
    // =========================================================================
    #[error("password must be at least {min_length} characters")]
    PasswordTooShort { min_length: usize },

    #[error("password must contain an uppercase letter")]
    PasswordNoUppercase,

    #[error("password must contain a lowercase letter")]
    PasswordNoLowercase,

    #[error("password must contain a digit")]
    PasswordNoNumber,

    #[error("password must contain a special character")]
    PasswordNoSpecial,

    /// Password hash is malformed or does not verify.
    #[error("password hash mismatch")]
    PasswordHashMismatch,

    // =========================================================================
    // OAuth
    // =========================================================================
    #[error("oauth provider not found: {0}")]
    ProviderNotFound(String),

    #[error("oauth provider not enabled: {0}")]
    ProviderNotEnabled(String),

    /// `state` parameter on the callback didn't match the one issued.
    #[error("invalid oauth state")]
    InvalidState,

    /// `state` parameter has outlived its TTL.
    #[error("oauth state expired")]
    StateExpired,

    #[error("oauth token exchange failed: {0}")]
    TokenExchange(String),

    #[error("failed to fetch oauth user info: {0}")]
    UserInfoFetch(String),

    /// Provider reported the user's email as unverified.
    #[error("oauth account email not verified")]
    OAuthEmailNotVerified,

    /// Provider did not return an email at all and none was on file.
    #[error("email required from oauth provider")]
    EmailRequired,

    /// The (provider, provider_user_id) pair is already linked to another account.
    #[error("oauth account already linked to a different user")]
    AccountAlreadyLinked,

    // =========================================================================
    // Realtime subscriptions
    // =========================================================================
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// Client attempted to open more concurrent subscriptions than allowed.
    #[error("subscription limit reached")]
    SubscriptionLimitReached,

    // =========================================================================
    // Scheduler
    // =========================================================================
    #[error("invalid cron expression: {0}")]
    InvalidCronExpression(String),

    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// A one-time schedule fired (or was asked to fire) more than once.
    #[error("schedule already executed")]
    AlreadyExecuted,

    #[error("unknown schedule type: {0}")]
    UnknownScheduleType(String),

    // =========================================================================
    // Storage / uploads
    // =========================================================================
    #[error("not found")]
    NotFound,

    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// A resolved path would escape the storage root. Raised as its own
    /// variant rather than a string-matched `Internal`, so tests can assert
    /// on it directly.
    #[error("path traversal rejected")]
    PathTraversal,

    #[error("upload exceeds the maximum allowed size")]
    SizeExceeded,

    #[error("mime type not allowed: {0}")]
    MimeTypeNotAllowed(String),

    /// Chunk arrived at an offset other than the upload's current offset.
    #[error("offset mismatch: expected {expected}, got {actual}")]
    OffsetMismatch { expected: u64, actual: u64 },

    #[error("upload not found: {0}")]
    UploadNotFound(String),

    #[error("upload already completed")]
    UploadAlreadyCompleted,

    // =========================================================================
    // Validation
    // =========================================================================
    #[error("validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("invalid input: {message}")]
    BadRequest { message: String },

    // =========================================================================
    // Server
    // =========================================================================
    /// The embedded `Store` collaborator failed (connection, I/O, or a
    /// constraint violation it did not map to a more specific variant).
    #[error("store error: {0}")]
    Store(String),

    /// Unspecified internal error; used when no more specific variant applies.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AlyxError {
    /// Returns a stable, machine-readable error code in
    /// `SCREAMING_SNAKE_CASE`.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UserAlreadyExists => "USER_ALREADY_EXISTS",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::RegistrationClosed => "REGISTRATION_CLOSED",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::AccountLocked { .. } => "ACCOUNT_LOCKED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::ExpiredToken => "EXPIRED_TOKEN",
            Self::InvalidIssuer => "INVALID_ISSUER",
            Self::InvalidAudience => "INVALID_AUDIENCE",
            Self::MissingSubject => "MISSING_SUBJECT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::PasswordTooShort { .. } => "PASSWORD_TOO_SHORT",
            Self::PasswordNoUppercase => "PASSWORD_NO_UPPERCASE",
            Self::PasswordNoLowercase => "PASSWORD_NO_LOWERCASE",
            Self::PasswordNoNumber => "PASSWORD_NO_NUMBER",
            Self::PasswordNoSpecial => "PASSWORD_NO_SPECIAL",
            Self::PasswordHashMismatch => "PASSWORD_HASH_MISMATCH",
            Self::ProviderNotFound(_) => "PROVIDER_NOT_FOUND",
            Self::ProviderNotEnabled(_) => "PROVIDER_NOT_ENABLED",
            Self::InvalidState => "INVALID_STATE",
            Self::StateExpired => "STATE_EXPIRED",
            Self::TokenExchange(_) => "TOKEN_EXCHANGE",
            Self::UserInfoFetch(_) => "USER_INFO_FETCH",
            Self::OAuthEmailNotVerified => "OAUTH_EMAIL_NOT_VERIFIED",
            Self::EmailRequired => "EMAIL_REQUIRED",
            Self::AccountAlreadyLinked => "ACCOUNT_ALREADY_LINKED",
            Self::CollectionNotFound(_) => "COLLECTION_NOT_FOUND",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::SubscriptionLimitReached => "SUBSCRIPTION_LIMIT_REACHED",
            Self::InvalidCronExpression(_) => "INVALID_CRON_EXPRESSION",
            Self::InvalidInterval(_) => "INVALID_INTERVAL",
            Self::InvalidTimezone(_) => "INVALID_TIMEZONE",
            Self::AlreadyExecuted => "ALREADY_EXECUTED",
            Self::UnknownScheduleType(_) => "UNKNOWN_SCHEDULE_TYPE",
            Self::NotFound => "NOT_FOUND",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::SizeExceeded => "SIZE_EXCEEDED",
            Self::MimeTypeNotAllowed(_) => "MIME_TYPE_NOT_ALLOWED",
            Self::OffsetMismatch { .. } => "OFFSET_MISMATCH",
            Self::UploadNotFound(_) => "UPLOAD_NOT_FOUND",
            Self::UploadAlreadyCompleted => "UPLOAD_ALREADY_COMPLETED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::Store(_) => "STORE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// `true` for errors that indicate a bug or a failed dependency rather
    /// than an ordinary rejection of caller input.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Internal(_))
    }
}

impl From<sqlx::Error> for AlyxError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_screaming_snake_case() {
        assert_eq!(AlyxError::InvalidCredentials.error_code(), "INVALID_CREDENTIALS");
        assert_eq!(AlyxError::UserNotFound.error_code(), "USER_NOT_FOUND");
        assert_eq!(
            AlyxError::OffsetMismatch { expected: 1, actual: 2 }.error_code(),
            "OFFSET_MISMATCH"
        );
    }

    #[test]
    fn server_errors_are_flagged() {
        assert!(AlyxError::Internal("boom".into()).is_server_error());
        assert!(AlyxError::Store("boom".into()).is_server_error());
        assert!(!AlyxError::InvalidCredentials.is_server_error());
        assert!(!AlyxError::NotFound.is_server_error());
    }

    #[test]
    fn user_not_found_and_invalid_credentials_remain_distinct() {
        // Flattening happens at the AuthService::login boundary, not here.
        assert_ne!(
            AlyxError::UserNotFound.error_code(),
            AlyxError::InvalidCredentials.error_code()
        );
    }

    #[test]
    fn sqlx_errors_map_to_store() {
        let err: AlyxError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.error_code(), "STORE_ERROR");
    }
}
