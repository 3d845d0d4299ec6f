//! # Token service
//!
//! Mints and validates the two token kinds the auth service issues, using
//! HMAC-SHA256. Validation does
//! not delegate ordering to `jsonwebtoken::Validation`: the library checks
//! signature and structure only, and `TokenService` re-implements the
//! ordered semantic checks (expiry, issuer, subject, audience) explicitly
//! so each failure mode is independently testable.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::config::JwtConfig;
use shared::errors::{AlyxError, AlyxResult};
use uuid::Uuid;

use crate::domain::{Claims, Role, TokenPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TokenKind {
    Access,
    Refresh,
}

/// Registered + custom claims as they appear on the wire. Refresh tokens
/// omit `email`/`verified`/`role`, carrying registered claims only.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawClaims {
    sub: String,
    iss: String,
    aud: Vec<String>,
    exp: i64,
    iat: i64,
    nbf: i64,
    jti: String,
    kind: TokenKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<Role>,
}

pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: JwtConfig,
}

impl TokenService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self { encoding_key, decoding_key, config }
    }

    /// The refresh token TTL this service mints with, in seconds — used
    /// by the auth service to compute `Session.expires_at` so the session
    /// row's lifetime always matches the token it fingerprints.
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.config.refresh_token_ttl_seconds as i64
    }

    /// Mints an access+refresh pair for a freshly authenticated or
    /// refreshed session.
    pub fn issue(&self, user_id: &str, email: &str, verified: bool, role: Role) -> AlyxResult<TokenPair> {
        let access_token = self.mint(TokenKind::Access, user_id, Some(email), Some(verified), Some(role))?;
        let refresh_token = self.mint(TokenKind::Refresh, user_id, None, None, None)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.config.access_token_ttl_seconds as i64,
            refresh_expires_in: self.config.refresh_token_ttl_seconds as i64,
        })
    }

    fn mint(
        &self,
        kind: TokenKind,
        user_id: &str,
        email: Option<&str>,
        verified: Option<bool>,
        role: Option<Role>,
    ) -> AlyxResult<String> {
        let now = Utc::now();
        let ttl = match kind {
            TokenKind::Access => Duration::seconds(self.config.access_token_ttl_seconds as i64),
            TokenKind::Refresh => Duration::seconds(self.config.refresh_token_ttl_seconds as i64),
        };

        let claims = RawClaims {
            sub: user_id.to_string(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            kind,
            email: email.map(str::to_string),
            verified,
            role,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AlyxError::Internal(format!("token encoding failed: {e}")))
    }

    /// Decodes and validates an access token, returning its claims. Checks
    /// run, in order: signature, expiry, issuer, missing subject, audience
    /// (only when an audience is configured).
    pub fn validate_access_token(&self, token: &str) -> AlyxResult<Claims> {
        let raw = self.decode_unchecked(token)?;
        self.check_ordered(&raw)?;

        if raw.kind != TokenKind::Access {
            return Err(AlyxError::InvalidToken);
        }

        Ok(Claims {
            user_id: raw.sub,
            email: raw.email.unwrap_or_default(),
            verified: raw.verified.unwrap_or(false),
            role: raw.role.unwrap_or(Role::User),
            issuer: raw.iss,
            audience: raw.aud,
            not_before: DateTime::from_timestamp(raw.nbf, 0).unwrap_or(now_epoch()),
            expires_at: DateTime::from_timestamp(raw.exp, 0).unwrap_or(now_epoch()),
        })
    }

    /// Validates a refresh token's signature and ordered claims without
    /// asserting anything about a session; the caller still has to look
    /// up the session by fingerprint.
    pub fn validate_refresh_token(&self, token: &str) -> AlyxResult<String> {
        let raw = self.decode_unchecked(token)?;
        self.check_ordered(&raw)?;

        if raw.kind != TokenKind::Refresh {
            return Err(AlyxError::InvalidToken);
        }

        Ok(raw.sub)
    }

    fn decode_unchecked(&self, token: &str) -> AlyxResult<RawClaims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims.clear();
        validation.insecure_disable_signature_validation = false;

        decode::<RawClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AlyxError::InvalidSignature)
    }

    /// Rejects in a fixed order (signature, expiry, issuer, subject,
    /// audience) rather than relying on `jsonwebtoken::Validation`'s own
    /// ordering, which does not guarantee which failure surfaces first.
    fn check_ordered(&self, raw: &RawClaims) -> AlyxResult<()> {
        if raw.exp <= Utc::now().timestamp() {
            return Err(AlyxError::ExpiredToken);
        }
        if raw.iss != self.config.issuer {
            return Err(AlyxError::InvalidIssuer);
        }
        if raw.sub.is_empty() {
            return Err(AlyxError::MissingSubject);
        }
        if !self.config.audience.is_empty()
            && !raw.aud.iter().any(|a| self.config.audience.contains(a))
        {
            return Err(AlyxError::InvalidAudience);
        }
        Ok(())
    }
}

fn now_epoch() -> DateTime<Utc> {
    Utc::now()
}

/// Deterministic fingerprint of a refresh token, used both when minting a
/// session (to store `Session.refresh_token_hash`) and at lookup time.
/// Never reversible; the plaintext token is never stored.
pub fn fingerprint(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JwtConfig {
        JwtConfig {
            secret: "test_secret_key_minimum_32_characters_long".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 2_592_000,
            issuer: "alyx".to_string(),
            audience: vec!["alyx-api".to_string()],
        }
    }

    #[test]
    fn issues_and_validates_access_token() {
        let service = TokenService::new(config());
        let pair = service.issue("user-1", "a@b.com", true, Role::Admin).unwrap();

        let claims = service.validate_access_token(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email, "a@b.com");
        assert_eq!(claims.role, Role::Admin);
        assert!(claims.verified);
    }

    #[test]
    fn refresh_token_has_no_email_or_role() {
        let service = TokenService::new(config());
        let pair = service.issue("user-1", "a@b.com", true, Role::User).unwrap();

        let sub = service.validate_refresh_token(&pair.refresh_token).unwrap();
        assert_eq!(sub, "user-1");

        // An access token must not validate as a refresh token.
        let err = service.validate_refresh_token(&pair.access_token).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_TOKEN");
    }

    #[test]
    fn rejects_wrong_signature() {
        let service = TokenService::new(config());
        let other = TokenService::new(JwtConfig { secret: "a_completely_different_32_char_secret".to_string(), ..config() });
        let pair = service.issue("user-1", "a@b.com", true, Role::User).unwrap();

        let err = other.validate_access_token(&pair.access_token).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SIGNATURE");
    }

    #[test]
    fn rejects_wrong_issuer() {
        let service = TokenService::new(config());
        let other = TokenService::new(JwtConfig { issuer: "someone-else".to_string(), ..config() });
        let pair = other.issue("user-1", "a@b.com", true, Role::User).unwrap();

        let err = service.validate_access_token(&pair.access_token).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ISSUER");
    }

    #[test]
    fn rejects_wrong_audience() {
        let service = TokenService::new(config());
        let other = TokenService::new(JwtConfig { audience: vec!["someone-else".to_string()], ..config() });
        let pair = other.issue("user-1", "a@b.com", true, Role::User).unwrap();

        let err = service.validate_access_token(&pair.access_token).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_AUDIENCE");
    }

    #[test]
    fn fingerprint_is_deterministic_and_distinct() {
        assert_eq!(fingerprint("token-a"), fingerprint("token-a"));
        assert_ne!(fingerprint("token-a"), fingerprint("token-b"));
    }
}
