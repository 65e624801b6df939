//! Final delivery of the bundle: a local file on a dry run, otherwise a
//! blob-plus-manifest push to the target registry.

use crate::{CoreError, Progress};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use stowage_remote::{media_types, Descriptor, ImageManifest, RegistryGateway};
use stowage_schema::ImageRef;
use tracing::info;

/// File name the dry-run bundle is written under.
pub const DRY_RUN_FILE_NAME: &str = "compose-bundle.tgz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Bundle written locally; no registry traffic happened.
    DryRun(PathBuf),
    /// Bundle pushed; manifest digest as returned by the registry.
    Pushed { digest: String },
}

pub struct BundlePublisher<'a> {
    gateway: &'a RegistryGateway,
}

impl<'a> BundlePublisher<'a> {
    pub fn new(gateway: &'a RegistryGateway) -> Self {
        Self { gateway }
    }

    pub fn publish(
        &self,
        target: Option<&ImageRef>,
        bundle: &[u8],
        dry_run: bool,
        out_dir: &Path,
        progress: Progress<'_>,
    ) -> Result<PublishOutcome, CoreError> {
        if dry_run {
            let path = out_dir.join(DRY_RUN_FILE_NAME);
            fs::write(&path, bundle)?;
            progress(&format!("dry run: bundle written to {}", path.display()));
            return Ok(PublishOutcome::DryRun(path));
        }
        let target = target.ok_or(CoreError::MissingTarget)?;

        progress(&format!("pushing bundle ({} bytes)", bundle.len()));
        let layer = self
            .gateway
            .put_blob(target, media_types::BUNDLE, bundle)?;
        let config = self
            .gateway
            .put_blob(target, media_types::CONTAINER_CONFIG, b"{}")?;

        let manifest = bundle_manifest(config, layer);
        let body = serde_json::to_vec(&manifest)?;
        let tag = target.tag_or_latest();
        let digest = self
            .gateway
            .put_manifest(target, media_types::DOCKER_MANIFEST, &body, tag)?;

        info!("published {target} -> {digest}");
        progress(&format!("published {target}"));
        Ok(PublishOutcome::Pushed { digest })
    }
}

/// Single-layer manifest wrapping the bundle blob, marked with the
/// compose-app annotation so consumers can tell bundles from images.
fn bundle_manifest(config: Descriptor, layer: Descriptor) -> ImageManifest {
    let mut annotations = BTreeMap::new();
    annotations.insert(
        media_types::BUNDLE_ANNOTATION_KEY.to_owned(),
        media_types::BUNDLE_ANNOTATION_VALUE.to_owned(),
    );
    ImageManifest {
        schema_version: 2,
        media_type: media_types::DOCKER_MANIFEST.to_owned(),
        config,
        layers: vec![layer],
        annotations,
    }
}
