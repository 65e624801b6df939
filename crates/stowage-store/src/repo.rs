use crate::layout::RepoLayout;
use crate::objects::ObjectStore;
use crate::tree::{CommitInfo, TreeManifest};
use crate::{fsync_dir, StoreError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// A content-addressable tree repository with named branch refs.
///
/// One branch per service; each commit snapshots an extracted container
/// filesystem. All mutation happens inside a [`Transaction`], which holds an
/// exclusive file lock: commits into a shared repository are serialized
/// because the ref-publication step is not safe for concurrent writers.
pub struct TreeRepo {
    layout: RepoLayout,
    objects: ObjectStore,
}

impl TreeRepo {
    /// Initialize-or-open a repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = RepoLayout::new(path.as_ref());
        layout.initialize()?;
        let objects = ObjectStore::new(layout.clone());
        Ok(Self { layout, objects })
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// Begin a transaction, taking the exclusive repository lock.
    pub fn prepare_transaction(&self) -> Result<Transaction<'_>, StoreError> {
        let lock_path = self.layout.lock_file();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        file.lock_exclusive()
            .map_err(|e| StoreError::LockFailed(e.to_string()))?;
        debug!("repository transaction prepared at {}", lock_path.display());
        Ok(Transaction {
            repo: self,
            _lock: file,
            staged_refs: Vec::new(),
            finished: false,
        })
    }

    /// Resolve a branch to its current revision.
    pub fn resolve_branch(&self, branch: &str) -> Result<String, StoreError> {
        let path = self.layout.ref_path(branch);
        if !path.exists() {
            return Err(StoreError::BranchNotFound(branch.to_owned()));
        }
        Ok(fs::read_to_string(&path)?.trim().to_owned())
    }

    /// Load the tree manifest for a revision, verifying its hash.
    pub fn read_tree(&self, revision: &str) -> Result<TreeManifest, StoreError> {
        let path = self.layout.trees_dir().join(revision);
        if !path.exists() {
            return Err(StoreError::RevisionNotFound(revision.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let actual = blake3::hash(content.as_bytes()).to_hex();
        if actual.as_str() != revision {
            return Err(StoreError::IntegrityFailure {
                hash: revision.to_owned(),
                expected: revision.to_owned(),
                actual: actual.to_string(),
            });
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Load the commit metadata for a revision.
    pub fn read_commit_info(&self, revision: &str) -> Result<CommitInfo, StoreError> {
        let path = self.layout.meta_dir().join(format!("{revision}.json"));
        if !path.exists() {
            return Err(StoreError::RevisionNotFound(revision.to_owned()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }

    /// List all branches with a published ref.
    pub fn list_branches(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.layout.refs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut branches = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    branches.push(name.to_owned());
                }
            }
        }
        branches.sort();
        Ok(branches)
    }

    fn write_atomic(&self, dir: &Path, dest: &Path, content: &[u8]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(dir)?;
        Ok(())
    }
}

/// An open repository transaction.
///
/// `commit()` writes objects, the tree manifest, and commit metadata, but
/// only *stages* the branch ref update. Nothing becomes reachable until
/// `commit_transaction()` publishes the staged refs; dropping the transaction
/// without committing discards them, leaving no partially-written content
/// reachable.
pub struct Transaction<'a> {
    repo: &'a TreeRepo,
    _lock: File,
    staged_refs: Vec<(String, String)>,
    finished: bool,
}

impl Transaction<'_> {
    /// Snapshot the directory at `path` as a commit on `branch`.
    /// Returns the revision id (blake3 of the canonical tree manifest).
    pub fn commit(&mut self, path: &Path, branch: &str, subject: &str) -> Result<String, StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }

        let manifest = TreeManifest::from_dir(path, &self.repo.objects)?;
        let content = manifest.canonical_json()?;
        let revision = blake3::hash(content.as_bytes()).to_hex().to_string();

        let trees_dir = self.repo.layout.trees_dir();
        let tree_path = trees_dir.join(&revision);
        if !tree_path.exists() {
            self.repo
                .write_atomic(&trees_dir, &tree_path, content.as_bytes())?;
        }

        let info = CommitInfo {
            revision: revision.clone(),
            branch: branch.to_owned(),
            subject: subject.to_owned(),
            created: chrono::Utc::now().to_rfc3339(),
        };
        let meta_dir = self.repo.layout.meta_dir();
        let meta_path = meta_dir.join(format!("{revision}.json"));
        self.repo.write_atomic(
            &meta_dir,
            &meta_path,
            serde_json::to_string_pretty(&info)?.as_bytes(),
        )?;

        self.staged_refs.push((branch.to_owned(), revision.clone()));
        info!("committed {} nodes as {revision} on branch {branch}", manifest.nodes.len());
        Ok(revision)
    }

    /// Atomically publish all staged branch refs and finish the transaction.
    pub fn commit_transaction(mut self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionFinished);
        }
        let refs_dir = self.repo.layout.refs_dir();
        for (branch, revision) in std::mem::take(&mut self.staged_refs) {
            let dest = refs_dir.join(&branch);
            self.repo
                .write_atomic(&refs_dir, &dest, revision.as_bytes())?;
            debug!("published ref {branch} -> {revision}");
        }
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_tree(dir: &Path) {
        fs::write(dir.join("a.txt"), "alpha").unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("sub").join("b.txt"), "beta").unwrap();
    }

    #[test]
    fn open_initializes_repository() {
        let dir = tempfile::tempdir().unwrap();
        TreeRepo::open(dir.path().join("repo")).unwrap();
        assert!(dir.path().join("repo").join("objects").is_dir());
    }

    #[test]
    fn commit_then_commit_transaction_publishes_ref() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let src = tempfile::tempdir().unwrap();
        fixture_tree(src.path());

        let mut tx = repo.prepare_transaction().unwrap();
        let rev = tx
            .commit(src.path(), "web", "docker.io/library/nginx@sha256:abc")
            .unwrap();
        tx.commit_transaction().unwrap();

        assert_eq!(repo.resolve_branch("web").unwrap(), rev);
        let manifest = repo.read_tree(&rev).unwrap();
        assert_eq!(manifest.nodes.len(), 3);
        let info = repo.read_commit_info(&rev).unwrap();
        assert_eq!(info.branch, "web");
        assert!(info.subject.contains("sha256:abc"));
    }

    #[test]
    fn dropped_transaction_leaves_ref_unpublished() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let src = tempfile::tempdir().unwrap();
        fixture_tree(src.path());

        {
            let mut tx = repo.prepare_transaction().unwrap();
            tx.commit(src.path(), "web", "subject").unwrap();
            // dropped without commit_transaction
        }
        assert!(matches!(
            repo.resolve_branch("web"),
            Err(StoreError::BranchNotFound(_))
        ));
    }

    #[test]
    fn committing_identical_tree_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let src = tempfile::tempdir().unwrap();
        fixture_tree(src.path());

        let mut tx = repo.prepare_transaction().unwrap();
        let rev1 = tx.commit(src.path(), "web", "s1").unwrap();
        let rev2 = tx.commit(src.path(), "web", "s2").unwrap();
        tx.commit_transaction().unwrap();
        assert_eq!(rev1, rev2, "identical trees must deduplicate to one revision");
    }

    #[test]
    fn branches_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let a = tempfile::tempdir().unwrap();
        fs::write(a.path().join("f"), "service a").unwrap();
        let b = tempfile::tempdir().unwrap();
        fs::write(b.path().join("f"), "service b").unwrap();

        let mut tx = repo.prepare_transaction().unwrap();
        let rev_a = tx.commit(a.path(), "svc-a", "a").unwrap();
        let rev_b = tx.commit(b.path(), "svc-b", "b").unwrap();
        tx.commit_transaction().unwrap();

        assert_ne!(rev_a, rev_b);
        assert_eq!(repo.list_branches().unwrap(), vec!["svc-a", "svc-b"]);
    }

    #[test]
    fn read_tree_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let src = tempfile::tempdir().unwrap();
        fixture_tree(src.path());

        let mut tx = repo.prepare_transaction().unwrap();
        let rev = tx.commit(src.path(), "web", "s").unwrap();
        tx.commit_transaction().unwrap();

        let tree_path = dir.path().join("repo").join("trees").join(&rev);
        fs::write(&tree_path, "{}").unwrap();
        assert!(matches!(
            repo.read_tree(&rev),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn commit_after_finish_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let repo = TreeRepo::open(dir.path().join("repo")).unwrap();
        let tx = repo.prepare_transaction().unwrap();
        tx.commit_transaction().unwrap();
        // A fresh transaction is required for further commits.
        let src = tempfile::tempdir().unwrap();
        let mut tx2 = repo.prepare_transaction().unwrap();
        assert!(tx2.commit(src.path(), "web", "s").is_ok());
        tx2.commit_transaction().unwrap();
    }
}
