//! # OAuth federation
//!
//! GitHub, Google, and a generic endpoint-driven provider, each a small
//! struct implementing [`OAuthProvider`] over `reqwest`, the same HTTP
//! client used elsewhere in this workspace rather than reaching for a
//! dedicated OAuth crate.
//!
//! State storage mirrors the revocation set's shape: a map behind a
//! mutex with a fixed TTL and a background sweep, except state is
//! single-use and is consumed on lookup rather than persisting until it
//! naturally expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use shared::config::{GenericOAuthProviderConfig, OAuthConfig, OAuthProviderConfig};
use shared::errors::{AlyxError, AlyxResult};
use shared::lifecycle::BackgroundWorker;
use uuid::Uuid;

/// Normalized user info returned by every provider, regardless of its
/// wire format.
#[derive(Debug, Clone)]
pub struct OAuthUserInfo {
    pub provider: String,
    pub provider_user_id: String,
    pub email: Option<String>,
    pub email_verified: bool,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn name(&self) -> &str;
    fn authorize_url(&self, state: &str) -> String;
    async fn exchange_code(&self, code: &str) -> AlyxResult<String>;
    async fn fetch_user_info(&self, access_token: &str) -> AlyxResult<OAuthUserInfo>;
}

pub struct GitHubProvider {
    config: OAuthProviderConfig,
    client: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: OAuthProviderConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

#[derive(Deserialize)]
struct GitHubTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    email: Option<String>,
}

#[derive(Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

#[async_trait]
impl OAuthProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "https://github.com/login/oauth/authorize?client_id={}&redirect_uri={}&state={}&scope=read:user+user:email",
            self.config.client_id, self.config.redirect_uri, state
        )
    }

    async fn exchange_code(&self, code: &str) -> AlyxResult<String> {
        let response = self
            .client
            .post("https://github.com/login/oauth/access_token")
            .header("Accept", "application/json")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?
            .json::<GitHubTokenResponse>()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?;

        Ok(response.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> AlyxResult<OAuthUserInfo> {
        let user: GitHubUser = self
            .client
            .get("https://api.github.com/user")
            .bearer_auth(access_token)
            .header("User-Agent", "alyx")
            .send()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?;

        let (email, verified) = match user.email {
            Some(email) => (Some(email), true),
            None => {
                let emails: Vec<GitHubEmail> = self
                    .client
                    .get("https://api.github.com/user/emails")
                    .bearer_auth(access_token)
                    .header("User-Agent", "alyx")
                    .send()
                    .await
                    .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?
                    .json()
                    .await
                    .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?;

                match emails.into_iter().find(|e| e.primary) {
                    Some(primary) => (Some(primary.email), primary.verified),
                    None => (None, false),
                }
            }
        };

        Ok(OAuthUserInfo {
            provider: self.name().to_string(),
            provider_user_id: user.id.to_string(),
            email,
            email_verified: verified,
        })
    }
}

pub struct GoogleProvider {
    config: OAuthProviderConfig,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(config: OAuthProviderConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
}

#[async_trait]
impl OAuthProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        format!(
            "https://accounts.google.com/o/oauth2/v2/auth?client_id={}&redirect_uri={}&state={}&response_type=code&scope=openid+email+profile",
            self.config.client_id, self.config.redirect_uri, state
        )
    }

    async fn exchange_code(&self, code: &str) -> AlyxResult<String> {
        let response = self
            .client
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?
            .json::<GoogleTokenResponse>()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?;

        Ok(response.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> AlyxResult<OAuthUserInfo> {
        let info: GoogleUserInfo = self
            .client
            .get("https://openidconnect.googleapis.com/v1/userinfo")
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?;

        Ok(OAuthUserInfo {
            provider: self.name().to_string(),
            provider_user_id: info.sub,
            email: info.email,
            email_verified: info.email_verified.unwrap_or(false),
        })
    }
}

/// A provider described entirely by its endpoints, for OAuth2-compliant
/// services not worth a dedicated struct.
pub struct GenericProvider {
    provider_name: String,
    config: OAuthProviderConfig,
    authorize_endpoint: String,
    token_endpoint: String,
    user_info_endpoint: String,
    client: reqwest::Client,
}

impl GenericProvider {
    pub fn new(
        provider_name: String,
        config: OAuthProviderConfig,
        authorize_endpoint: String,
        token_endpoint: String,
        user_info_endpoint: String,
    ) -> Self {
        Self { provider_name, config, authorize_endpoint, token_endpoint, user_info_endpoint, client: reqwest::Client::new() }
    }
}

#[derive(Deserialize)]
struct GenericTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GenericUserInfo {
    id: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
}

#[async_trait]
impl OAuthProvider for GenericProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("{}?client_id={}&redirect_uri={}&state={}", self.authorize_endpoint, self.config.client_id, self.config.redirect_uri, state)
    }

    async fn exchange_code(&self, code: &str) -> AlyxResult<String> {
        let response = self
            .client
            .post(&self.token_endpoint)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?
            .json::<GenericTokenResponse>()
            .await
            .map_err(|e| AlyxError::TokenExchange(e.to_string()))?;

        Ok(response.access_token)
    }

    async fn fetch_user_info(&self, access_token: &str) -> AlyxResult<OAuthUserInfo> {
        let info: GenericUserInfo = self
            .client
            .get(&self.user_info_endpoint)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| AlyxError::UserInfoFetch(e.to_string()))?;

        Ok(OAuthUserInfo { provider: self.name().to_string(), provider_user_id: info.id, email: info.email, email_verified: info.email_verified })
    }
}

/// Maps a provider name to a concrete, ready-to-use [`OAuthProvider`].
/// `github` and `google` resolve against their dedicated config slots;
/// any other name is looked up in `config.generic`. Fails with
/// `ProviderNotFound` for a name with no matching slot at all, and
/// `ProviderNotEnabled` for a known slot that hasn't been configured.
pub fn resolve_provider(name: &str, config: &OAuthConfig) -> AlyxResult<Box<dyn OAuthProvider>> {
    match name {
        "github" => config
            .github
            .clone()
            .map(|cfg| Box::new(GitHubProvider::new(cfg)) as Box<dyn OAuthProvider>)
            .ok_or_else(|| AlyxError::ProviderNotEnabled(name.to_string())),
        "google" => config
            .google
            .clone()
            .map(|cfg| Box::new(GoogleProvider::new(cfg)) as Box<dyn OAuthProvider>)
            .ok_or_else(|| AlyxError::ProviderNotEnabled(name.to_string())),
        _ => match config.generic.get(name) {
            Some(cfg) => {
                let provider_config = OAuthProviderConfig {
                    client_id: cfg.client_id.clone(),
                    client_secret: cfg.client_secret.clone(),
                    redirect_uri: cfg.redirect_uri.clone(),
                };
                Ok(Box::new(GenericProvider::new(
                    name.to_string(),
                    provider_config,
                    cfg.authorize_endpoint.clone(),
                    cfg.token_endpoint.clone(),
                    cfg.user_info_endpoint.clone(),
                )))
            }
            None => Err(AlyxError::ProviderNotFound(name.to_string())),
        },
    }
}

struct StateEntry {
    provider: String,
    expires_at: DateTime<Utc>,
}

/// Single-use CSRF state tokens for the OAuth authorize/callback
/// round-trip. Consumed on lookup; a sweeper also clears anything left
/// unclaimed past its TTL.
pub struct OAuthStateStore {
    entries: Arc<Mutex<HashMap<String, StateEntry>>>,
    ttl: Duration,
    sweeper: Option<BackgroundWorker>,
}

impl OAuthStateStore {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), ttl, sweeper: None }
    }

    pub fn issue(&self, provider: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        self.entries.lock().insert(token.clone(), StateEntry { provider: provider.to_string(), expires_at });
        token
    }

    /// Consumes the state token, returning its provider name if it was
    /// present and unexpired.
    pub fn consume(&self, token: &str, expected_provider: &str) -> AlyxResult<()> {
        let entry = self.entries.lock().remove(token);
        match entry {
            None => Err(AlyxError::InvalidState),
            Some(entry) if entry.expires_at < Utc::now() => Err(AlyxError::StateExpired),
            Some(entry) if entry.provider != expected_provider => Err(AlyxError::InvalidState),
            Some(_) => Ok(()),
        }
    }

    pub fn start_sweeper(&mut self, sweep_interval: Duration) {
        let entries = self.entries.clone();
        self.sweeper = Some(BackgroundWorker::spawn(move |notify| async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = notify.notified() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        entries.lock().retain(|_, e| e.expires_at > now);
                    }
                }
            }
        }));
    }

    pub fn stop_sweeper(&self) {
        if let Some(sweeper) = &self.sweeper {
            sweeper.stop();
        }
    }
}
