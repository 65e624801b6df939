use crate::objects::ObjectStore;
use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// One entry in a committed tree, keyed by its slash-separated relative path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeNode {
    pub path: String,
    pub mode: u32,
    #[serde(flatten)]
    pub kind: TreeNodeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeNodeKind {
    Dir,
    /// Regular file; `object` is the blake3 hash of its content.
    File { object: String },
    Symlink { target: String },
}

/// A whole directory snapshot: entries sorted lexicographically by path.
///
/// The revision id of a commit is the blake3 hash of this manifest's
/// canonical serialization, so the revision is a pure function of tree
/// content — committing an identical tree twice yields the same revision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeManifest {
    pub nodes: Vec<TreeNode>,
}

impl TreeManifest {
    /// Walk `root`, storing file contents into `objects` and recording one
    /// node per directory, file, and symlink. Any other file type (device
    /// node, socket, FIFO) is a hard error naming the offending path.
    pub fn from_dir(root: &Path, objects: &ObjectStore) -> Result<Self, StoreError> {
        let mut nodes = Vec::new();
        collect(root, root, objects, &mut nodes)?;
        nodes.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self { nodes })
    }

    pub fn canonical_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The revision id this manifest commits as.
    pub fn revision(&self) -> Result<String, StoreError> {
        let content = self.canonical_json()?;
        Ok(blake3::hash(content.as_bytes()).to_hex().to_string())
    }
}

fn collect(
    root: &Path,
    current: &Path,
    objects: &ObjectStore,
    nodes: &mut Vec<TreeNode>,
) -> Result<(), StoreError> {
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| StoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .into_owned();

        let meta = full.symlink_metadata()?;
        let mode = meta.permissions().mode();
        let ft = meta.file_type();

        if ft.is_dir() {
            nodes.push(TreeNode {
                path: rel,
                mode,
                kind: TreeNodeKind::Dir,
            });
            collect(root, &full, objects, nodes)?;
        } else if ft.is_file() {
            let data = fs::read(&full)?;
            let object = objects.put(&data)?;
            nodes.push(TreeNode {
                path: rel,
                mode,
                kind: TreeNodeKind::File { object },
            });
        } else if ft.is_symlink() {
            let target = fs::read_link(&full)?.to_string_lossy().into_owned();
            nodes.push(TreeNode {
                path: rel,
                mode,
                kind: TreeNodeKind::Symlink { target },
            });
        } else {
            return Err(StoreError::UnsupportedFileType(rel));
        }
    }
    Ok(())
}

/// Per-revision commit metadata. The subject (the pinned image name) is for
/// audit and debugging only — it is not part of the revision hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitInfo {
    pub revision: String,
    pub branch: String,
    pub subject: String,
    pub created: String,
}
