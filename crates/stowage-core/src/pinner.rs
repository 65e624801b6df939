//! Tag-to-digest pinning of every service image.
//!
//! A compose file names images by tag; a published bundle must name them by
//! digest so the same bytes get pulled for the lifetime of the release.
//! Pinning resolves each tag through the registry, fans a manifest list out
//! into its per-platform entries, fetches the container config blob for each
//! platform, and rewrites the service's `image` field in place.

use crate::{CoreError, Progress};
use std::collections::BTreeMap;
use stowage_remote::{Manifest, RegistryGateway};
use stowage_schema::{ComposeApp, ImageRef, SchemaError};
use tracing::{debug, info};

/// One resolved platform of a pinned image.
#[derive(Debug, Clone)]
pub struct PinnedImage {
    /// Platform label (`amd64`, `arm64`, `armv7`, ...); empty for a
    /// single-platform image.
    pub platform: String,
    /// Digest of the image manifest for this platform.
    pub manifest_digest: String,
    /// Raw container config blob for this platform.
    pub config: Vec<u8>,
}

/// Per-service pinning result, keyed by service name.
pub type PinnedApp = BTreeMap<String, Vec<PinnedImage>>;

/// Key under which a (service, platform) pair is stored in the bundle.
///
/// Single-platform images map to `service/default`; platform entries of a
/// manifest list map to `service/<label>`.
pub fn platform_key(service: &str, platform: &str) -> String {
    if platform.is_empty() {
        format!("{service}/default")
    } else {
        format!("{service}/{platform}")
    }
}

pub struct ImagePinner<'a> {
    gateway: &'a RegistryGateway,
}

impl<'a> ImagePinner<'a> {
    pub fn new(gateway: &'a RegistryGateway) -> Self {
        Self { gateway }
    }

    /// Resolve every service image to a digest, rewriting `image` fields in
    /// place. Fails on the first unresolvable service; the app is left
    /// partially rewritten only on error paths, which abort the run anyway.
    pub fn pin(&self, app: &mut ComposeApp, progress: Progress<'_>) -> Result<PinnedApp, CoreError> {
        let mut pinned = PinnedApp::new();

        for (name, service) in &mut app.services {
            let reference = ImageRef::parse(&service.image)?;
            if reference.digest().is_some() {
                return Err(CoreError::AlreadyPinned {
                    service: name.clone(),
                    image: service.image.clone(),
                });
            }
            if reference.tag().is_none() {
                return Err(CoreError::Schema(SchemaError::MissingTag(
                    service.image.clone(),
                )));
            }

            progress(&format!("pinning {name} ({})", service.image));
            let descriptor = self.gateway.get_tag(&reference)?;
            let manifest = self
                .gateway
                .get_manifest(&reference, &descriptor.digest)?;

            let images = match manifest {
                Manifest::Image(manifest) => {
                    debug!("{name}: single-platform image {}", descriptor.digest);
                    let config = self.gateway.get_blob(&reference, &manifest.config.digest)?;
                    vec![PinnedImage {
                        platform: String::new(),
                        manifest_digest: descriptor.digest.clone(),
                        config,
                    }]
                }
                Manifest::List(list) => {
                    let mut images = Vec::with_capacity(list.manifests.len());
                    for entry in &list.manifests {
                        let Some(platform) = &entry.platform else {
                            return Err(CoreError::MissingPlatform {
                                reference: reference.to_string(),
                                digest: entry.digest.clone(),
                            });
                        };
                        let label = platform.label();
                        progress(&format!("pinning {name} ({label})"));
                        let manifest = self.gateway.get_manifest(&reference, &entry.digest)?;
                        let Manifest::Image(manifest) = manifest else {
                            return Err(CoreError::NotAnImage {
                                reference: format!("{reference}@{}", entry.digest),
                            });
                        };
                        let config =
                            self.gateway.get_blob(&reference, &manifest.config.digest)?;
                        images.push(PinnedImage {
                            platform: label,
                            manifest_digest: entry.digest.clone(),
                            config,
                        });
                    }
                    images
                }
            };

            service.image = reference.pinned(&descriptor.digest);
            info!("{name}: pinned to {}", service.image);
            pinned.insert(name.clone(), images);
        }

        Ok(pinned)
    }
}
