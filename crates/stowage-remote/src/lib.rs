//! OCI registry gateway for Stowage.
//!
//! This crate provides the registry side of the publishing pipeline: a typed
//! Docker/OCI manifest data model (`Manifest` as a closed union over image
//! manifests and manifest lists), a synchronous registry v2 HTTP client
//! (`RegistryGateway`) for tag, manifest, and blob traffic, and the JSON
//! auth configuration file.

pub mod client;
pub mod config;
pub mod manifest;

pub use client::RegistryGateway;
pub use config::RegistryConfig;
pub use manifest::{
    media_types, Descriptor, ImageManifest, Manifest, ManifestList, Platform, sha256_digest,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("registry auth failed: {0}")]
    Auth(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported manifest media type: {0}")]
    UnsupportedManifest(String),
    #[error("registry config error: {0}")]
    Config(String),
    #[error("digest mismatch for '{reference}': expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },
    #[error("invalid reference: {0}")]
    Schema(#[from] stowage_schema::SchemaError),
}
