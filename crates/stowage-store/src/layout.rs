use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current repository format version. Incremented on incompatible layout changes.
pub const REPO_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the Stowage tree repository.
///
/// `objects/` holds file contents by blake3 hash, `trees/` holds serialized
/// tree manifests by revision, `meta/` holds per-revision commit metadata,
/// `refs/` maps branch names (service names) to revisions. All subdirectories
/// are created lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct RepoLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct RepoVersion {
    format_version: u32,
}

impl RepoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    #[inline]
    pub fn trees_dir(&self) -> PathBuf {
        self.root.join("trees")
    }

    #[inline]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    #[inline]
    pub fn refs_dir(&self) -> PathBuf {
        self.root.join("refs")
    }

    #[inline]
    pub fn ref_path(&self, branch: &str) -> PathBuf {
        self.refs_dir().join(branch)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.objects_dir())?;
        fs::create_dir_all(self.trees_dir())?;
        fs::create_dir_all(self.meta_dir())?;
        fs::create_dir_all(self.refs_dir())?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = RepoVersion {
                format_version: REPO_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&self.root)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&self.root)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: RepoVersion = serde_json::from_str(&content)?;

        if ver.format_version != REPO_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: REPO_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = RepoLayout::new("/tmp/stowage-repo");
        assert_eq!(
            layout.objects_dir(),
            PathBuf::from("/tmp/stowage-repo/objects")
        );
        assert_eq!(layout.trees_dir(), PathBuf::from("/tmp/stowage-repo/trees"));
        assert_eq!(layout.refs_dir(), PathBuf::from("/tmp/stowage-repo/refs"));
        assert_eq!(
            layout.ref_path("web"),
            PathBuf::from("/tmp/stowage-repo/refs/web")
        );
    }

    #[test]
    fn initialize_creates_directories_and_version() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();

        assert!(layout.objects_dir().is_dir());
        assert!(layout.trees_dir().is_dir());
        assert!(layout.meta_dir().is_dir());
        assert!(layout.refs_dir().is_dir());
        layout.verify_version().unwrap();
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        layout.verify_version().unwrap();
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = RepoLayout::new(dir.path());
        layout.initialize().unwrap();

        fs::write(
            dir.path().join("version"),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
