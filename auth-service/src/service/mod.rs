//! # Service layer
//!
//! [`AuthService`] orchestrates the repository plus every collaborator in
//! this crate (token service, revocation set, rate limiter, brute-force
//! protector, password hasher, OAuth providers) into the full set of
//! operations: registration, login, refresh, logout, token validation,
//! OAuth login/linking, and the admin CRUD surface. There is no HTTP
//! layer or email delivery in this workspace; hooks exist instead for a
//! caller to wire those in.

pub mod auth_service;

pub use auth_service::AuthService;
