//! Compose application model, image references, and restart-policy mapping for Stowage.
//!
//! This crate defines the schema layer: strict YAML parsing of the compose
//! application (`ComposeApp`), the typed per-service description
//! (`ServiceDescription`), normalized image reference handling (`ImageRef`),
//! and the total restart-policy translation used by unit generation.

pub mod compose;
pub mod reference;
pub mod restart;

pub use compose::{
    load_app_dir, parse_app_str, BindOptions, ComposeApp, ServiceDescription, VolumeMount,
    APP_FILE_NAME,
};
pub use reference::ImageRef;
pub use restart::systemd_restart;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read compose file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse compose file: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("application has no services")]
    NoServices,
    #[error("service '{0}' is missing the 'image' attribute")]
    MissingImage(String),
    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
    #[error("image reference '{0}' must carry a tag, e.g. '{0}:stable'")]
    MissingTag(String),
    #[error("unrecognized restart policy: '{0}'")]
    UnknownRestartPolicy(String),
}
