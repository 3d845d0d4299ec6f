//! # Alyx Storage Service
//!
//! Implements C5 (the resumable upload engine) and its object-backend
//! collaborator: chunked upload with offset reconciliation, pluggable
//! filesystem/S3 backends with optional streaming compression, and
//! scheduled GC of abandoned uploads.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`domain`] | Storage entities | [`domain::Upload`], [`domain::File`], [`domain::BucketConfig`] |
//! | [`backend`] | Object backend collaborator | [`backend::ObjectBackend`] |
//! | [`filesystem`] | Local filesystem backend | [`filesystem::FilesystemBackend`] |
//! | [`s3`] | S3 backend | [`s3::S3Backend`] |
//! | [`compress`] | Streaming gzip/zstd wrapper | [`compress::CompressingBackend`] |
//! | [`repository`] | `Store`-backed persistence | [`repository::UploadRepository`], [`repository::FileRepository`] |
//! | [`upload_engine`] | Resumable upload engine | [`upload_engine::UploadEngine`] |

pub mod backend;
pub mod compress;
pub mod domain;
pub mod filesystem;
pub mod repository;
pub mod s3;
pub mod upload_engine;

pub use backend::ObjectBackend;
pub use domain::{BucketConfig, File, Upload};
pub use upload_engine::UploadEngine;
