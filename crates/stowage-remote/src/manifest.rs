use crate::RemoteError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Registry media types the gateway understands.
///
/// Reference: Docker image manifest v2 schema 2 and the OCI image spec.
pub mod media_types {
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_LIST: &str =
        "application/vnd.docker.distribution.manifest.list.v2+json";
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
    pub const CONTAINER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
    pub const LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    /// Media type of a published application bundle blob.
    pub const BUNDLE: &str = "application/tar+gzip";
    /// Manifest annotation marking a compose-application bundle, so a
    /// consumer can tell it apart from an ordinary container image.
    pub const BUNDLE_ANNOTATION_KEY: &str = "compose-app";
    pub const BUNDLE_ANNOTATION_VALUE: &str = "v1";
}

/// The SHA-256 content digest of `data`, in registry `sha256:<hex>` form.
pub fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// A content reference inside a manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// The label downstream artifacts are keyed by. Architecture alone is
    /// ambiguous across 32-bit ARM revisions, so the variant suffix is
    /// appended there (`armv6`, `armv7`); every other architecture uses the
    /// plain architecture string.
    pub fn label(&self) -> String {
        if self.architecture == "arm" {
            format!(
                "{}{}",
                self.architecture,
                self.variant.as_deref().unwrap_or("")
            )
        } else {
            self.architecture.clone()
        }
    }
}

/// A single-platform image manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A multi-architecture manifest list (image index).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestList {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

/// Every manifest shape the pipeline accepts, as a closed union. Anything the
/// registry serves outside these two shapes is an `UnsupportedManifest`
/// error, so a new shape is a compile-time-checked decision point, not a
/// silently ignored branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Manifest {
    Image(ImageManifest),
    List(ManifestList),
}

impl Manifest {
    /// Decode manifest bytes according to their media type (from the
    /// response's Content-Type, falling back to the embedded `mediaType`).
    pub fn from_bytes(media_type: &str, data: &[u8]) -> Result<Self, RemoteError> {
        let media_type = if media_type.is_empty() {
            embedded_media_type(data)
        } else {
            media_type.to_owned()
        };
        match media_type.as_str() {
            media_types::DOCKER_MANIFEST | media_types::OCI_MANIFEST => {
                let m: ImageManifest = serde_json::from_slice(data)
                    .map_err(|e| RemoteError::Serialization(format!("image manifest: {e}")))?;
                Ok(Manifest::Image(m))
            }
            media_types::DOCKER_MANIFEST_LIST | media_types::OCI_INDEX => {
                let m: ManifestList = serde_json::from_slice(data)
                    .map_err(|e| RemoteError::Serialization(format!("manifest list: {e}")))?;
                Ok(Manifest::List(m))
            }
            other => Err(RemoteError::UnsupportedManifest(other.to_owned())),
        }
    }
}

fn embedded_media_type(data: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Probe {
        #[serde(rename = "mediaType", default)]
        media_type: String,
    }
    serde_json::from_slice::<Probe>(data)
        .map(|p| p.media_type)
        .unwrap_or_default()
}
