use crate::SchemaError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Fixed name of the declarative application source file inside the app directory.
pub const APP_FILE_NAME: &str = "docker-compose.yml";

/// A compose application: the top-level document plus its service map.
///
/// Parsing is strict — unknown service-level keys are rejected at load time
/// so that shape mismatches surface once, not at every access site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComposeApp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub services: BTreeMap<String, ServiceDescription>,
    /// Top-level named volume declarations, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<serde_yaml::Value>,
    /// Top-level network declarations, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<serde_yaml::Value>,
}

impl ComposeApp {
    /// Canonical serialized form of the (pinned) application. Key order is
    /// stable because all maps are `BTreeMap`s; this is the byte content of
    /// `docker-compose.json` inside the bundle.
    pub fn canonical_json(&self) -> Result<String, SchemaError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate invariants that strict deserialization cannot express.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.services.is_empty() {
            return Err(SchemaError::NoServices);
        }
        for (name, svc) in &self.services {
            if svc.image.is_empty() {
                return Err(SchemaError::MissingImage(name.clone()));
            }
        }
        Ok(())
    }
}

/// One declared service. Supported attributes are typed for direct use by the
/// pipeline; attributes outside the runtime allowlist are still parsed (so the
/// translator can reject them by name and value) but never translated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDescription {
    #[serde(default)]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "de_env_map"
    )]
    pub environment: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tmpfs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_add: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cap_drop: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctls: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restart: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_mode: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domainname: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub oom_score_adj: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub working_dir: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub tty: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Published ports are carried through into the pinned description for
    /// the device-side network layer; the spec translator does not touch them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,

    // Attributes below are parsed so the support pre-check can report the
    // offending value, but are outside the translation allowlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blkio_config: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_quota: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_rt_runtime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_rt_period: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpuset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroup_parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configs: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_spec: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_opt: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_search: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_links: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_add: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_reservation: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_swappiness: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memswap_limit: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shm_size: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin_open: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ulimits: Option<serde_yaml::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userns_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes_from: Option<serde_yaml::Value>,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

/// A declared mount. Normalized from either the compose short string syntax
/// (`source:target[:ro]`) or the long mapping syntax.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct VolumeMount {
    /// `bind`, `volume`, or `tmpfs`.
    pub kind: String,
    pub source: String,
    pub target: String,
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<BindOptions>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct BindOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub propagation: String,
}

impl<'de> Deserialize<'de> for VolumeMount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Short(String),
            Long {
                #[serde(rename = "type", default)]
                kind: Option<String>,
                #[serde(default)]
                source: String,
                target: String,
                #[serde(default)]
                read_only: bool,
                #[serde(default)]
                bind: Option<BindOptions>,
            },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Short(spec) => parse_short_volume(&spec).map_err(serde::de::Error::custom),
            Raw::Long {
                kind,
                source,
                target,
                read_only,
                bind,
            } => {
                let kind = kind.unwrap_or_else(|| infer_volume_kind(&source));
                Ok(VolumeMount {
                    kind,
                    source,
                    target,
                    read_only,
                    bind,
                })
            }
        }
    }
}

/// Short syntax: `source:target` or `source:target:mode` where mode is a
/// comma-separated list containing `ro` or `rw`.
fn parse_short_volume(spec: &str) -> Result<VolumeMount, String> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [src, dst] => (*src, *dst, ""),
        [src, dst, mode] => (*src, *dst, *mode),
        _ => return Err(format!("invalid volume declaration: '{spec}'")),
    };
    let read_only = mode.split(',').any(|m| m == "ro");
    Ok(VolumeMount {
        kind: infer_volume_kind(source),
        source: source.to_owned(),
        target: target.to_owned(),
        read_only,
        bind: None,
    })
}

/// Absolute and relative paths are bind mounts; anything else is a named volume.
fn infer_volume_kind(source: &str) -> String {
    if source.starts_with('/') || source.starts_with('.') || source.starts_with('~') {
        "bind".to_owned()
    } else {
        "volume".to_owned()
    }
}

/// The compose `environment` key accepts a map (`KEY: value`) or a list
/// (`- KEY=value`, `- KEY`). Both normalize into a key-ordered map where a
/// missing value stays `None` (value-less variables are preserved).
fn de_env_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawEnv {
        Map(BTreeMap<String, Option<EnvScalar>>),
        List(Vec<String>),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EnvScalar {
        Str(String),
        Num(i64),
        Bool(bool),
        Float(f64),
    }

    impl EnvScalar {
        fn into_string(self) -> String {
            match self {
                EnvScalar::Str(s) => s,
                EnvScalar::Num(n) => n.to_string(),
                EnvScalar::Bool(b) => b.to_string(),
                EnvScalar::Float(f) => f.to_string(),
            }
        }
    }

    match RawEnv::deserialize(deserializer)? {
        RawEnv::Map(m) => Ok(m
            .into_iter()
            .map(|(k, v)| (k, v.map(EnvScalar::into_string)))
            .collect()),
        RawEnv::List(entries) => {
            let mut map = BTreeMap::new();
            for entry in entries {
                match entry.split_once('=') {
                    Some((k, v)) => map.insert(k.to_owned(), Some(v.to_owned())),
                    None => map.insert(entry, None),
                };
            }
            Ok(map)
        }
    }
}

pub fn parse_app_str(input: &str) -> Result<ComposeApp, SchemaError> {
    let app: ComposeApp = serde_yaml::from_str(input)?;
    app.validate()?;
    Ok(app)
}

/// Load the application from `<dir>/docker-compose.yml`.
pub fn load_app_dir(dir: impl AsRef<Path>) -> Result<ComposeApp, SchemaError> {
    let content = std::fs::read_to_string(dir.as_ref().join(APP_FILE_NAME))?;
    parse_app_str(&content)
}
