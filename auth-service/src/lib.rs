//! # Alyx Auth Service
//!
//! Implements C3 (authentication), C4 (rate limiting and brute-force
//! protection), and the token/revocation primitives they share: credential
//! issuance and validation, session lifecycle, OAuth federation, and
//! admission control for the auth endpoints.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`domain`] | Auth entities | [`domain::User`], [`domain::Session`] |
//! | [`token`] | JWT mint/verify | [`token::TokenService`] |
//! | [`revocation`] | Revocation set | [`revocation::RevocationSet`] |
//! | [`rate_limit`] | Token-bucket admission control | [`rate_limit::RateLimiter`] |
//! | [`brute_force`] | Failed-attempt lockout | [`brute_force::BruteForceProtector`] |
//! | [`password`] | Hashing and policy | [`password::PasswordHasher`], [`password::PasswordPolicy`] |
//! | [`oauth`] | Federated login providers | [`oauth::OAuthProvider`] |
//! | [`repository`] | `Store`-backed persistence | [`repository::UserRepository`] |
//! | [`service`] | Business logic | [`service::AuthService`] |

pub mod brute_force;
pub mod domain;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod repository;
pub mod revocation;
pub mod service;
pub mod token;

pub use domain::{Claims, OAuthAccount, Role, Session, TokenPair, User};
pub use service::AuthService;
