//! # Application Configuration
//!
//! Centralized configuration management using environment variables.
//!
//! ## How It Works
//!
//! Configuration is loaded from multiple sources in order of precedence:
//!
//! 1. **Default values** - Sensible defaults for development
//! 2. **`.env` file** - Local overrides (git-ignored)
//! 3. **Environment variables** - Docker/K8s configuration
//!
//! ## Environment Variable Format
//!
//! Variables use the `APP_` prefix with `__` as nested separator:
//!
//! ```bash
//! APP_DATABASE__PATH=./data/alyx.sqlite3
//! APP_JWT__ACCESS_TOKEN_TTL_SECONDS=900
//!
//! # Docker-compatible bare overrides are also honored:
//! DATABASE_URL=sqlite://./data/alyx.sqlite3
//! JWT_SECRET=your_secret_key_minimum_32_characters
//! ```
//!
//! ## Configuration Sections
//!
//! | Section       | Purpose                                          |
//! |---------------|---------------------------------------------------|
//! | `database`    | Embedded store connection settings                 |
//! | `jwt`         | Access/refresh token settings                      |
//! | `rate_limit`  | Token-bucket rate limiter parameters               |
//! | `brute_force` | Brute-force lockout thresholds                     |
//! | `realtime`    | Change detector poll interval, subscription limits |
//! | `scheduler`   | Scheduler tick interval, default timezone          |
//! | `storage`     | Object backend selection and limits                |
//! | `oauth`       | Federated login provider credentials               |

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Root application configuration. Immutable after construction; share it
/// behind an `Arc` across subsystems.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub brute_force: BruteForceConfig,
    pub realtime: RealtimeConfig,
    pub scheduler: SchedulerConfig,
    pub storage: StorageConfig,
    pub oauth: OAuthConfig,

    /// Service name for tracing and logging.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Runtime environment (development/staging/production).
    #[serde(default)]
    pub environment: AppEnvironment,
}

/// Embedded relational store configuration, consumed by
/// [`crate::store::sqlite::SqliteStore`].
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Filesystem path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// JWT (JSON Web Token) configuration for the auth service's token service.
///
/// ## Security Requirements
///
/// - Access tokens: short-lived (15 min default)
/// - Refresh tokens: longer-lived (30 days default), individually revocable
/// - Secret must be at least 32 characters
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Secret key for HS256 signing. Must be at least 32 characters.
    pub secret: String,

    /// Access token time-to-live in seconds. Default: `900` (15 minutes).
    #[serde(default = "default_access_token_ttl")]
    pub access_token_ttl_seconds: u64,

    /// Refresh token time-to-live in seconds. Default: `2592000` (30 days).
    #[serde(default = "default_refresh_token_ttl")]
    pub refresh_token_ttl_seconds: u64,

    /// Token issuer claim (`iss`). Default: `alyx`.
    #[serde(default = "default_issuer")]
    pub issuer: String,

    /// Accepted audience values for the `aud` claim. Default: `["alyx-api"]`.
    /// When non-empty, a token's `aud` must match at least one entry;
    /// when empty, audience is not checked (spec.md §4.1: "when
    /// audiences are configured").
    #[serde(default = "default_audience")]
    pub audience: Vec<String>,
}

/// Token-bucket rate limiter parameters (login attempts, token refresh, etc).
/// Fixed-window-with-refill, not a strict leaky bucket: a bucket holds
/// `capacity` tokens and is fully refilled once `window_seconds` elapses
/// since its last refill — a deliberately simpler admission-control
/// semantics than a continuous per-second trickle.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens in the bucket (burst capacity), and the number
    /// restored on each full-window refill.
    #[serde(default = "default_rate_limit_capacity")]
    pub capacity: u32,

    /// Refill window, in seconds: once this much time has passed since
    /// the bucket's last refill, it resets to `capacity`.
    #[serde(default = "default_rate_limit_window_seconds")]
    pub window_seconds: u64,

    /// How often the sweeper prunes idle per-key buckets, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

/// Brute-force login protection thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct BruteForceConfig {
    /// Failed attempts within the window before lockout.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Sliding window over which attempts are counted, in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Lockout duration once the threshold is exceeded, in seconds.
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: u64,

    /// How often the sweeper prunes expired counters, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

/// Realtime subscription broker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Change detector poll interval, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum concurrent subscriptions per client connection.
    #[serde(default = "default_max_subscriptions_per_client")]
    pub max_subscriptions_per_client: u32,

    /// Per-client send timeout before a delta is dropped, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Bounded channel capacity between the detector and the broker.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Scheduler tick configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduler evaluates due schedules, in seconds.
    #[serde(default = "default_scheduler_tick_seconds")]
    pub tick_interval_seconds: u64,

    /// Default IANA timezone used when a schedule does not specify one.
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

/// Object storage backend selection and shared upload limits.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Which backend to construct: `"filesystem"` or `"s3"`.
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Base directory for the filesystem backend.
    #[serde(default = "default_storage_root")]
    pub filesystem_root: String,

    /// Bucket name for the S3 backend.
    #[serde(default)]
    pub s3_bucket: Option<String>,

    /// Region for the S3 backend.
    #[serde(default)]
    pub s3_region: Option<String>,

    /// Maximum accepted upload size, in bytes. Default: 5 GiB.
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size_bytes: u64,

    /// Part size used for S3 multipart uploads, in bytes. Default: 5 MiB,
    /// the minimum S3 accepts for any part but the last.
    #[serde(default = "default_multipart_part_size")]
    pub multipart_part_size_bytes: u64,

    /// Optional streaming compression applied to stored objects: `"none"`,
    /// `"gzip"`, or `"zstd"`.
    #[serde(default = "default_compression")]
    pub compression: String,
}

/// Federated login (OAuth2) configuration, one entry per enabled provider.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OAuthConfig {
    #[serde(default)]
    pub github: Option<OAuthProviderConfig>,

    #[serde(default)]
    pub google: Option<OAuthProviderConfig>,

    /// Endpoint-driven providers, keyed by the provider name clients pass
    /// on `/auth/oauth/{provider}/...`. Anything not named `github` or
    /// `google` is resolved against this map.
    #[serde(default)]
    pub generic: std::collections::HashMap<String, GenericOAuthProviderConfig>,

    /// State-token TTL, in seconds. Default: `600` (10 minutes).
    #[serde(default = "default_oauth_state_ttl")]
    pub state_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Credentials plus the three endpoints a generic, non-dedicated OAuth2
/// provider needs (authorize/token/user-info) — `github`/`google` bake
/// these in; everything else supplies them here.
#[derive(Debug, Clone, Deserialize)]
pub struct GenericOAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub user_info_endpoint: String,
}

/// Application runtime environment. Affects logging format only; there is
/// no HTTP layer here to gate CORS/security headers on.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Process
    ///
    /// 1. Loads `.env` file if present (silently ignores if missing)
    /// 2. Applies default values
    /// 3. Overrides with `APP_*` environment variables
    /// 4. Applies Docker-compatible bare overrides (`DATABASE_URL`, etc.)
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            .set_default("database.path", default_database_path())?
            .set_default("database.max_connections", default_max_connections())?
            .set_default("database.connect_timeout_seconds", default_connect_timeout())?
            .set_default("jwt.access_token_ttl_seconds", default_access_token_ttl())?
            .set_default("jwt.refresh_token_ttl_seconds", default_refresh_token_ttl())?
            .set_default("jwt.issuer", default_issuer())?
            .set_default("jwt.audience", default_audience())?
            .set_default("rate_limit.capacity", default_rate_limit_capacity())?
            .set_default("rate_limit.window_seconds", default_rate_limit_window_seconds())?
            .set_default("rate_limit.sweep_interval_seconds", default_sweep_interval())?
            .set_default("brute_force.max_attempts", default_max_attempts())?
            .set_default("brute_force.window_seconds", default_window_seconds())?
            .set_default("brute_force.lockout_seconds", default_lockout_seconds())?
            .set_default("brute_force.sweep_interval_seconds", default_sweep_interval())?
            .set_default("realtime.poll_interval_ms", default_poll_interval_ms())?
            .set_default(
                "realtime.max_subscriptions_per_client",
                default_max_subscriptions_per_client(),
            )?
            .set_default("realtime.send_timeout_ms", default_send_timeout_ms())?
            .set_default("realtime.channel_capacity", default_channel_capacity() as i64)?
            .set_default("scheduler.tick_interval_seconds", default_scheduler_tick_seconds())?
            .set_default("scheduler.default_timezone", default_timezone())?
            .set_default("storage.backend", default_storage_backend())?
            .set_default("storage.filesystem_root", default_storage_root())?
            .set_default("storage.max_upload_size_bytes", default_max_upload_size() as i64)?
            .set_default(
                "storage.multipart_part_size_bytes",
                default_multipart_part_size() as i64,
            )?
            .set_default("storage.compression", default_compression())?
            .set_default("oauth.state_ttl_seconds", default_oauth_state_ttl())?
            .set_default("environment", "development")?
            .set_default("service_name", default_service_name())?
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.path", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .set_override_option("service_name", std::env::var("SERVICE_NAME").ok())?
            .build()?;

        config.try_deserialize()
    }

    #[inline]
    pub fn is_development(&self) -> bool {
        self.environment == AppEnvironment::Development
    }

    #[inline]
    pub fn is_production(&self) -> bool {
        self.environment == AppEnvironment::Production
    }
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_service_name() -> String {
    "alyx".to_string()
}

fn default_database_path() -> String {
    "./data/alyx.sqlite3".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_access_token_ttl() -> u64 {
    900
}

fn default_refresh_token_ttl() -> u64 {
    2_592_000 // 30 days
}

fn default_issuer() -> String {
    "alyx".to_string()
}

fn default_audience() -> Vec<String> {
    vec!["alyx-api".to_string()]
}

fn default_rate_limit_capacity() -> u32 {
    20
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_window_seconds() -> u64 {
    900 // 15 minutes
}

fn default_lockout_seconds() -> u64 {
    900 // 15 minutes
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_subscriptions_per_client() -> u32 {
    100
}

fn default_send_timeout_ms() -> u64 {
    250
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_scheduler_tick_seconds() -> u64 {
    1
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_storage_backend() -> String {
    "filesystem".to_string()
}

fn default_storage_root() -> String {
    "./data/uploads".to_string()
}

fn default_max_upload_size() -> u64 {
    5 * 1024 * 1024 * 1024 // 5 GiB
}

fn default_multipart_part_size() -> u64 {
    5 * 1024 * 1024 // 5 MiB, S3's minimum non-final part size
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_oauth_state_ttl() -> u64 {
    600
}

// =============================================================================
// Tests
// =============================================================================
