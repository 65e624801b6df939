//! Content-addressable tree repository for Stowage.
//!
//! This crate provides the storage layer the publishing pipeline commits
//! extracted container filesystems into: a blake3-addressed `ObjectStore` for
//! file contents, tree manifests describing whole directory snapshots, branch
//! refs naming the latest revision per service, and a single-writer
//! transaction (`prepare` → `commit` → `commit_transaction`) guarding all
//! mutations.

pub mod layout;
pub mod objects;
pub mod repo;
pub mod tree;

pub use layout::{RepoLayout, REPO_FORMAT_VERSION};
pub use objects::ObjectStore;
pub use repo::{Transaction, TreeRepo};
pub use tree::{CommitInfo, TreeManifest, TreeNode, TreeNodeKind};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("repository I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for object '{hash}': expected {expected}, got {actual}")]
    IntegrityFailure {
        hash: String,
        expected: String,
        actual: String,
    },
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("revision not found: {0}")]
    RevisionNotFound(String),
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    #[error("failed to acquire repository lock: {0}")]
    LockFailed(String),
    #[error("repository format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unsupported file type in committed tree: {0}")]
    UnsupportedFileType(String),
    #[error("transaction already finished")]
    TransactionFinished,
}
