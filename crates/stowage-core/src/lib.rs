//! Publishing pipeline for Stowage compose applications.
//!
//! This crate ties together schema parsing, the registry gateway, and the
//! tree store into the sequential pipeline that turns a compose application
//! into an immutable bundle: pin images to digests, commit extracted
//! filesystems, translate services to runtime specs, generate systemd units,
//! pack the deterministic archive, and publish it (or write it locally on a
//! dry run).

pub mod bundle;
pub mod committer;
pub mod oci;
pub mod pinner;
pub mod pipeline;
pub mod publisher;
pub mod spec;
pub mod units;

pub use bundle::BundleBuilder;
pub use committer::FilesystemCommitter;
pub use pinner::{platform_key, ImagePinner, PinnedApp, PinnedImage};
pub use pipeline::{Pipeline, PipelineOptions};
pub use publisher::{BundlePublisher, PublishOutcome};
pub use spec::{check_supported, RuntimeSpecTranslator};
pub use units::generate_units;

use std::path::PathBuf;
use thiserror::Error;

/// Callback invoked with one human-readable line per pipeline step. The CLI
/// routes these to styled terminal output; libraries and tests pass a no-op.
pub type Progress<'a> = &'a (dyn Fn(&str) + Sync);

/// A progress sink that discards everything.
pub fn silent() -> Progress<'static> {
    fn noop(_: &str) {}
    &noop
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema error: {0}")]
    Schema(#[from] stowage_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] stowage_store::StoreError),
    #[error("remote error: {0}")]
    Remote(#[from] stowage_remote::RemoteError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("service '{service}' uses unsupported field {field}: {value}")]
    UnsupportedField {
        service: String,
        field: String,
        value: String,
    },
    #[error("service '{service}': tty is not available on the target runtime")]
    TerminalNotSupported { service: String },
    #[error("service '{service}': image '{image}' is already pinned; expected a tag")]
    AlreadyPinned { service: String, image: String },
    #[error("service '{service}': no command to run (no command, entrypoint, or image cmd)")]
    NoCommand { service: String },
    #[error("'{reference}' did not resolve to an image manifest")]
    NotAnImage { reference: String },
    #[error("manifest list entry {digest} of '{reference}' carries no platform")]
    MissingPlatform { reference: String, digest: String },
    #[error("cannot archive '{path}': unsupported file type")]
    UnsupportedEntry { path: PathBuf },
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },
    #[error("invalid container config for service '{service}': {reason}")]
    InvalidContainerConfig { service: String, reason: String },
    #[error("publish target reference is required unless --dry-run is given")]
    MissingTarget,
}
