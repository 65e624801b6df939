//! Translation of compose services into runtime specs.
//!
//! Two halves: a pre-flight allowlist check that rejects any compose field
//! the target runtime cannot honor (naming the field and its value), and
//! the translator proper, which folds a service description and its image's
//! container config into an OCI-style spec through a chain of stages. Each
//! stage consumes the spec value and returns the extended one, so a stage
//! can never observe a half-applied successor.

use crate::oci::{
    self, normalize_capability, Capabilities, Mount, RuntimeSpec, ALL_CAPABILITIES,
    DEFAULT_CAPABILITIES,
};
use crate::pinner::{platform_key, PinnedApp};
use crate::CoreError;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use stowage_schema::{ComposeApp, ServiceDescription};
use tracing::warn;

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Sysctls forced onto every container that does not share the host
/// network: unprivileged ping and low ports.
const FORCED_SYSCTLS: &[(&str, &str)] = &[
    ("net.ipv4.ping_group_range", "0 2147483647"),
    ("net.ipv4.ip_unprivileged_port_start", "0"),
];

/// Reject every service that uses a compose field outside the supported
/// set. The first offender aborts, naming the service, the field, and the
/// declared value.
pub fn check_supported(app: &ComposeApp) -> Result<(), CoreError> {
    for (name, service) in &app.services {
        check_service(name, service)?;
    }
    Ok(())
}

fn check_service(name: &str, service: &ServiceDescription) -> Result<(), CoreError> {
    macro_rules! reject {
        ($($field:ident),+ $(,)?) => {
            $(
                if let Some(value) = &service.$field {
                    return Err(CoreError::UnsupportedField {
                        service: name.to_owned(),
                        field: stringify!($field).to_owned(),
                        value: yaml_str(value),
                    });
                }
            )+
        };
    }

    reject!(
        blkio_config,
        build,
        cgroup_parent,
        configs,
        container_name,
        cpu_count,
        cpu_percent,
        cpu_period,
        cpu_quota,
        cpu_rt_period,
        cpu_rt_runtime,
        cpu_shares,
        cpus,
        cpuset,
        credential_spec,
        depends_on,
        deploy,
        devices,
        dns,
        dns_opt,
        dns_search,
        env_file,
        expose,
        extends,
        external_links,
        group_add,
        healthcheck,
        ipc,
        isolation,
        links,
        logging,
        mac_address,
        mem_limit,
        mem_reservation,
        mem_swappiness,
        memswap_limit,
        pid,
        pids_limit,
        platform,
        runtime,
        secrets,
        shm_size,
        stop_grace_period,
        stop_signal,
        ulimits,
        userns_mode,
        volumes_from,
    );

    // Toggles are rejected on their value, not their presence: an explicit
    // `init: false` or `scale: 0` is harmless.
    if service.init == Some(true) {
        return Err(unsupported(name, "init", "true"));
    }
    if service.stdin_open == Some(true) {
        return Err(unsupported(name, "stdin_open", "true"));
    }
    if let Some(scale) = service.scale.filter(|&n| n > 0) {
        return Err(unsupported(name, "scale", &scale.to_string()));
    }
    Ok(())
}

fn unsupported(service: &str, field: &str, value: &str) -> CoreError {
    CoreError::UnsupportedField {
        service: service.to_owned(),
        field: field.to_owned(),
        value: value.to_owned(),
    }
}

fn yaml_str(value: &impl serde::Serialize) -> String {
    serde_yaml::to_string(value)
        .map(|s| s.trim_end().to_owned())
        .unwrap_or_else(|_| "<unprintable>".to_owned())
}

/// The `config` object of a container config blob — the image-provided
/// defaults the service description layers over.
#[derive(Debug, Clone, Default, Deserialize)]
struct ContainerConfig {
    #[serde(default, rename = "Env")]
    env: Vec<String>,
    #[serde(default, rename = "Cmd")]
    cmd: Vec<String>,
    #[serde(default, rename = "Entrypoint")]
    entrypoint: Vec<String>,
    #[serde(default, rename = "WorkingDir")]
    working_dir: String,
    #[serde(default, rename = "Labels")]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct ImageConfig {
    #[serde(default)]
    config: ContainerConfig,
}

pub struct RuntimeSpecTranslator;

impl RuntimeSpecTranslator {
    /// Translate one service against one platform's container config blob.
    /// Returns the spec as deterministic pretty JSON.
    pub fn translate(
        service_name: &str,
        service: &ServiceDescription,
        config_bytes: &[u8],
    ) -> Result<Vec<u8>, CoreError> {
        if service.tty {
            return Err(CoreError::TerminalNotSupported {
                service: service_name.to_owned(),
            });
        }
        let image: ImageConfig = serde_json::from_slice(config_bytes).map_err(|e| {
            CoreError::InvalidContainerConfig {
                service: service_name.to_owned(),
                reason: e.to_string(),
            }
        })?;
        let config = image.config;

        let spec = oci::default_spec();
        let spec = with_annotations(spec, service, &config);
        let spec = with_process(spec, service_name, service, &config)?;
        let spec = with_sysctls(spec, service);
        let spec = with_capabilities(spec, service);
        let spec = with_mounts(spec, service);

        Ok(serde_json::to_vec_pretty(&spec)?)
    }

    /// Translate every pinned (service, platform) pair, keyed like the
    /// bundle's `specs/` namespace.
    pub fn translate_all(
        app: &ComposeApp,
        pinned: &PinnedApp,
    ) -> Result<BTreeMap<String, Vec<u8>>, CoreError> {
        let mut specs = BTreeMap::new();
        for (name, images) in pinned {
            let Some(service) = app.services.get(name) else {
                continue;
            };
            for image in images {
                let key = platform_key(name, &image.platform);
                specs.insert(key, Self::translate(name, service, &image.config)?);
            }
        }
        Ok(specs)
    }
}

/// Image labels first, service labels layered over them.
fn with_annotations(
    mut spec: RuntimeSpec,
    service: &ServiceDescription,
    config: &ContainerConfig,
) -> RuntimeSpec {
    for (k, v) in &config.labels {
        spec.annotations.insert(k.clone(), v.clone());
    }
    for (k, v) in &service.labels {
        spec.annotations.insert(k.clone(), v.clone());
    }
    spec
}

fn with_process(
    mut spec: RuntimeSpec,
    service_name: &str,
    service: &ServiceDescription,
    config: &ContainerConfig,
) -> Result<RuntimeSpec, CoreError> {
    // Command resolution: an explicit service command wins outright;
    // otherwise the effective entrypoint (service over image) is prefixed
    // to the image cmd.
    let args = if service.command.is_empty() {
        let mut args = if service.entrypoint.is_empty() {
            config.entrypoint.clone()
        } else {
            service.entrypoint.clone()
        };
        args.extend(config.cmd.iter().cloned());
        args
    } else {
        service.command.clone()
    };
    if args.is_empty() {
        return Err(CoreError::NoCommand {
            service: service_name.to_owned(),
        });
    }
    spec.process.args = args;

    // Env merge: image env first (valueless vars preserved as bare names),
    // service environment over it, then the ambient defaults if absent.
    let mut env: BTreeMap<String, Option<String>> = BTreeMap::new();
    for entry in &config.env {
        match entry.split_once('=') {
            Some((k, v)) => env.insert(k.to_owned(), Some(v.to_owned())),
            None => env.insert(entry.clone(), None),
        };
    }
    for (k, v) in &service.environment {
        env.insert(k.clone(), v.clone());
    }
    env.entry("PATH".to_owned())
        .or_insert_with(|| Some(DEFAULT_PATH.to_owned()));
    // HOSTNAME is injected even when the service declares none, in which
    // case the variable is present but empty.
    env.entry("HOSTNAME".to_owned())
        .or_insert_with(|| Some(service.hostname.clone()));
    spec.process.env = env
        .into_iter()
        .map(|(k, v)| match v {
            Some(v) => format!("{k}={v}"),
            None => k,
        })
        .collect();

    spec.process.cwd = if !service.working_dir.is_empty() {
        service.working_dir.clone()
    } else if !config.working_dir.is_empty() {
        config.working_dir.clone()
    } else {
        "/".to_owned()
    };

    if !service.user.is_empty() {
        let (uid, gid) = service.user.split_once(':').unwrap_or((&service.user, ""));
        match uid.parse::<u32>() {
            Ok(uid) => spec.process.user.uid = uid,
            Err(_) => warn!("{service_name}: ignoring non-numeric user '{}'", service.user),
        }
        if !gid.is_empty() {
            match gid.parse::<u32>() {
                Ok(gid) => spec.process.user.gid = gid,
                Err(_) => warn!("{service_name}: ignoring non-numeric group in '{}'", service.user),
            }
        }
    }

    if service.oom_score_adj != 0 {
        spec.process.oom_score_adj = Some(service.oom_score_adj);
    }
    spec.root.readonly = service.read_only;
    if !service.hostname.is_empty() {
        spec.hostname = service.hostname.clone();
    }
    Ok(spec)
}

fn with_sysctls(mut spec: RuntimeSpec, service: &ServiceDescription) -> RuntimeSpec {
    if !service.domainname.is_empty() {
        spec.linux
            .sysctl
            .insert("kernel.domainname".to_owned(), service.domainname.clone());
    }
    if service.network_mode != "host" {
        for (key, value) in FORCED_SYSCTLS {
            spec.linux
                .sysctl
                .insert((*key).to_owned(), (*value).to_owned());
        }
    }
    // Service sysctls layer last and may override the forced values.
    for (key, value) in &service.sysctls {
        if FORCED_SYSCTLS.iter().any(|(k, _)| k == key) {
            warn!("overriding default sysctl {key} with '{value}'");
        }
        spec.linux.sysctl.insert(key.clone(), value.clone());
    }
    spec
}

fn with_capabilities(mut spec: RuntimeSpec, service: &ServiceDescription) -> RuntimeSpec {
    let baseline: &[&str] = if service.privileged {
        ALL_CAPABILITIES
    } else {
        DEFAULT_CAPABILITIES
    };
    let mut caps: BTreeSet<String> = baseline.iter().map(|&c| c.to_owned()).collect();

    for cap in &service.cap_add {
        if cap.eq_ignore_ascii_case("ALL") {
            caps.extend(ALL_CAPABILITIES.iter().map(|&c| c.to_owned()));
        } else {
            caps.insert(normalize_capability(cap));
        }
    }
    for cap in &service.cap_drop {
        if cap.eq_ignore_ascii_case("ALL") {
            caps.clear();
        } else {
            caps.remove(&normalize_capability(cap));
        }
    }

    let caps: Vec<String> = caps.into_iter().collect();
    spec.process.capabilities = Some(Capabilities {
        bounding: caps.clone(),
        effective: caps.clone(),
        permitted: caps,
    });
    spec
}

fn with_mounts(mut spec: RuntimeSpec, service: &ServiceDescription) -> RuntimeSpec {
    for volume in &service.volumes {
        if volume.kind == "tmpfs" {
            spec.mounts.push(tmpfs_mount(&volume.target, volume.read_only));
            continue;
        }
        let propagation = volume
            .bind
            .as_ref()
            .filter(|b| !b.propagation.is_empty())
            .map_or("rprivate", |b| b.propagation.as_str());
        let access = if volume.read_only { "ro" } else { "rw" };
        // The mount type is the compose volume type so the device runtime
        // can resolve named volumes; only tmpfs gets special treatment.
        spec.mounts.push(Mount {
            destination: volume.target.clone(),
            fs_type: volume.kind.clone(),
            source: volume.source.clone(),
            options: vec![
                "rbind".to_owned(),
                propagation.to_owned(),
                access.to_owned(),
            ],
        });
    }
    for target in &service.tmpfs {
        spec.mounts.push(tmpfs_mount(target, false));
    }
    spec
}

fn tmpfs_mount(target: &str, read_only: bool) -> Mount {
    let mut options = vec![
        "nosuid".to_owned(),
        "noexec".to_owned(),
        "nodev".to_owned(),
    ];
    if read_only {
        options.push("ro".to_owned());
    }
    Mount {
        destination: target.to_owned(),
        fs_type: "tmpfs".to_owned(),
        source: "tmpfs".to_owned(),
        options,
    }
}
