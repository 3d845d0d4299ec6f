//! # Repository layer
//!
//! Thin persistence helpers layered on top of [`shared::store::Store`] for
//! the three tables this crate owns (`_alyx_users`,
//! `_alyx_sessions`, `_alyx_oauth_accounts`). This repository
//! holds the generic `Store` collaborator, not a concrete `PgPool`, — the embedded relational store
//! is an external collaborator for this workspace, so persistence here
//! is expressed entirely in terms of that trait's ordered-query/row-scan/
//! atomic-write contract.

pub mod user_repository;

pub use user_repository::UserRepository;
