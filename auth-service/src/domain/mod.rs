//! # Domain layer
//!
//! Core entities shared by the token, revocation, and auth services. No
//! framework or storage coupling lives here; `entities` describes shapes
//! only, persistence is the repository's job.

pub mod entities;

pub use entities::*;
