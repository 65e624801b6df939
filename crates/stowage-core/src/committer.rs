//! Extraction of pinned images into the content-addressable tree store.
//!
//! Each (service, platform) pair becomes one tree commit: the image's layers
//! are streamed from the registry, gunzipped, and applied in order to a
//! scratch directory (honoring overlayfs whiteouts so later layers shadow
//! earlier ones), then the finished tree is committed under a branch named
//! after the service. The commit revision is a pure function of tree
//! content, so republishing an unchanged image is a no-op at the store
//! level.

use crate::pinner::{platform_key, PinnedApp};
use crate::{CoreError, Progress};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use stowage_remote::{Manifest, RegistryGateway};
use stowage_schema::{ComposeApp, ImageRef};
use stowage_store::TreeRepo;
use tracing::{debug, info};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

pub struct FilesystemCommitter<'a> {
    gateway: &'a RegistryGateway,
}

impl<'a> FilesystemCommitter<'a> {
    pub fn new(gateway: &'a RegistryGateway) -> Self {
        Self { gateway }
    }

    /// Extract and commit every pinned (service, platform) pair into the
    /// repo at `repo_path`. Returns commit revisions keyed by
    /// [`platform_key`]. The first failure aborts the run; an interrupted
    /// run records nothing visible (refs only land at transaction commit).
    pub fn commit_all(
        &self,
        app: &ComposeApp,
        pinned: &PinnedApp,
        repo_path: &Path,
        progress: Progress<'_>,
    ) -> Result<BTreeMap<String, Vec<u8>>, CoreError> {
        let repo = TreeRepo::open(repo_path)?;
        let mut commits = BTreeMap::new();

        for (service, images) in pinned {
            let Some(description) = app.services.get(service) else {
                continue;
            };
            let reference = ImageRef::parse(&description.image)?;

            for image in images {
                let key = platform_key(service, &image.platform);
                progress(&format!("committing {key}"));

                let scratch = tempfile::TempDir::new()?;
                self.extract_image(&reference, &image.manifest_digest, scratch.path())?;

                let mut tx = repo.prepare_transaction()?;
                let revision = tx.commit(scratch.path(), service, &description.image)?;
                tx.commit_transaction()?;

                info!("{key}: committed revision {revision}");
                commits.insert(key, revision.into_bytes());
            }
        }

        Ok(commits)
    }

    /// Fetch the image manifest at `digest` and apply its layers in order
    /// under `root`.
    fn extract_image(
        &self,
        reference: &ImageRef,
        digest: &str,
        root: &Path,
    ) -> Result<(), CoreError> {
        let manifest = self.gateway.get_manifest(reference, digest)?;
        let Manifest::Image(manifest) = manifest else {
            return Err(CoreError::NotAnImage {
                reference: format!("{reference}@{digest}"),
            });
        };

        for layer in &manifest.layers {
            debug!("applying layer {} ({} bytes)", layer.digest, layer.size);
            let blob = self.gateway.open_blob(reference, &layer.digest)?;
            apply_layer(GzDecoder::new(blob), root)?;
        }
        Ok(())
    }
}

/// Unpack one uncompressed layer tar onto `root`, applying whiteouts.
fn apply_layer(reader: impl std::io::Read, root: &Path) -> Result<(), CoreError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(false);
    archive.set_unpack_xattrs(false);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        if name == OPAQUE_WHITEOUT {
            // Opaque whiteout: the directory holding it hides everything
            // from lower layers.
            if let Some(parent) = path.parent() {
                clear_dir(&root.join(parent))?;
            }
            continue;
        }
        if let Some(hidden) = name.strip_prefix(WHITEOUT_PREFIX) {
            let target = match path.parent() {
                Some(parent) => root.join(parent).join(hidden),
                None => root.join(hidden),
            };
            remove_entry(&target)?;
            continue;
        }

        entry.unpack_in(root)?;
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<(), std::io::Error> {
    if !dir.exists() {
        return Ok(());
    }
    for child in fs::read_dir(dir)? {
        remove_entry(&child?.path())?;
    }
    Ok(())
}

fn remove_entry(path: &Path) -> Result<(), std::io::Error> {
    match path.symlink_metadata() {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn layer_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut ar = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            header.set_cksum();
            ar.append_data(&mut header, path, *data).unwrap();
        }
        ar.into_inner().unwrap()
    }

    #[test]
    fn later_layer_shadows_earlier_file() {
        let root = tempfile::tempdir().unwrap();
        apply_layer(Cursor::new(layer_with(&[("etc/motd", b"old")])), root.path()).unwrap();
        apply_layer(Cursor::new(layer_with(&[("etc/motd", b"new")])), root.path()).unwrap();
        assert_eq!(fs::read(root.path().join("etc/motd")).unwrap(), b"new");
    }

    #[test]
    fn whiteout_removes_shadowed_file() {
        let root = tempfile::tempdir().unwrap();
        apply_layer(
            Cursor::new(layer_with(&[("etc/motd", b"old"), ("etc/keep", b"k")])),
            root.path(),
        )
        .unwrap();
        apply_layer(Cursor::new(layer_with(&[("etc/.wh.motd", b"")])), root.path()).unwrap();
        assert!(!root.path().join("etc/motd").exists());
        assert!(root.path().join("etc/keep").exists());
    }

    #[test]
    fn opaque_whiteout_clears_directory() {
        let root = tempfile::tempdir().unwrap();
        apply_layer(
            Cursor::new(layer_with(&[("data/a", b"1"), ("data/b", b"2")])),
            root.path(),
        )
        .unwrap();
        apply_layer(
            Cursor::new(layer_with(&[("data/.wh..wh..opq", b""), ("data/c", b"3")])),
            root.path(),
        )
        .unwrap();
        assert!(!root.path().join("data/a").exists());
        assert!(!root.path().join("data/b").exists());
        assert_eq!(fs::read(root.path().join("data/c")).unwrap(), b"3");
    }

    #[test]
    fn whiteout_of_missing_entry_is_harmless() {
        let root = tempfile::tempdir().unwrap();
        apply_layer(
            Cursor::new(layer_with(&[("etc/.wh.ghost", b"")])),
            root.path(),
        )
        .unwrap();
    }
}
