//! Deterministic bundle archive construction.
//!
//! The bundle is a tar.gz with four namespaces: `content/<key>` holds the
//! tree-commit revision per (service, platform), `specs/<key>` the runtime
//! specs, `units/<name>` the systemd units, and the archive root carries
//! `docker-compose.json` (the canonical pinned application) plus the app's
//! own source tree, filtered through `.stowageignore`.
//!
//! Determinism guarantees match the store's layer packing: entries sorted
//! lexicographically, timestamps zeroed, ownership 0:0.

use crate::CoreError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use stowage_schema::{ComposeApp, APP_FILE_NAME};
use tracing::debug;

/// Per-line glob patterns for paths excluded from the bundle.
pub const IGNORE_FILE_NAME: &str = ".stowageignore";

pub struct BundleBuilder;

impl BundleBuilder {
    /// Pack commits, specs, units, the canonical compose JSON, and the
    /// filtered app directory into one gzipped tar.
    pub fn build(
        app: &ComposeApp,
        commits: &BTreeMap<String, Vec<u8>>,
        specs: &BTreeMap<String, Vec<u8>>,
        units: &BTreeMap<String, Vec<u8>>,
        app_dir: &Path,
    ) -> Result<Vec<u8>, CoreError> {
        let ignore = IgnoreList::load(app_dir)?;

        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut ar = tar::Builder::new(encoder);
        ar.follow_symlinks(false);

        for (key, revision) in commits {
            append_bytes(&mut ar, &format!("content/{key}"), revision)?;
        }
        for (key, spec) in specs {
            append_bytes(&mut ar, &format!("specs/{key}"), spec)?;
        }
        for (name, unit) in units {
            append_bytes(&mut ar, &format!("units/{name}"), unit)?;
        }
        append_bytes(&mut ar, "docker-compose.json", app.canonical_json()?.as_bytes())?;

        let mut entries = collect_entries(app_dir, app_dir)?;
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (rel, full) in &entries {
            if rel == APP_FILE_NAME
                || rel == IGNORE_FILE_NAME
                || rel == crate::publisher::DRY_RUN_FILE_NAME
                || ignore.matches(rel)
            {
                debug!("bundle: skipping {rel}");
                continue;
            }
            append_path(&mut ar, rel, full)?;
        }

        let encoder = ar.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// Compiled `.stowageignore` patterns. A missing file filters nothing.
struct IgnoreList {
    patterns: Vec<glob::Pattern>,
}

impl IgnoreList {
    fn load(app_dir: &Path) -> Result<Self, CoreError> {
        let path = app_dir.join(IGNORE_FILE_NAME);
        let mut patterns = Vec::new();
        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let pattern = glob::Pattern::new(line).map_err(|e| {
                    CoreError::InvalidIgnorePattern {
                        pattern: line.to_owned(),
                        reason: e.to_string(),
                    }
                })?;
                patterns.push(pattern);
            }
        }
        Ok(Self { patterns })
    }

    fn matches(&self, rel: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(rel))
    }
}

fn collect_entries(root: &Path, current: &Path) -> Result<Vec<(String, PathBuf)>, CoreError> {
    let mut result = Vec::new();
    for entry in fs::read_dir(current)? {
        let entry = entry?;
        let full = entry.path();
        let rel = full
            .strip_prefix(root)
            .map_err(|e| CoreError::Io(std::io::Error::other(format!("path strip: {e}"))))?
            .to_string_lossy()
            .into_owned();

        let meta = full.symlink_metadata()?;
        if meta.is_dir() {
            result.push((rel, full.clone()));
            result.extend(collect_entries(root, &full)?);
        } else {
            result.push((rel, full));
        }
    }
    Ok(result)
}

fn base_header(entry_type: tar::EntryType, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    header
}

fn append_bytes<W: std::io::Write>(
    ar: &mut tar::Builder<W>,
    path: &str,
    data: &[u8],
) -> Result<(), CoreError> {
    let mut header = base_header(tar::EntryType::Regular, 0o644);
    header.set_size(data.len() as u64);
    header.set_cksum();
    ar.append_data(&mut header, path, data)?;
    Ok(())
}

fn append_path<W: std::io::Write>(
    ar: &mut tar::Builder<W>,
    rel: &str,
    full: &Path,
) -> Result<(), CoreError> {
    let ft = full.symlink_metadata()?.file_type();
    if ft.is_file() {
        append_bytes(ar, rel, &fs::read(full)?)?;
    } else if ft.is_dir() {
        let mut header = base_header(tar::EntryType::Directory, 0o755);
        header.set_size(0);
        header.set_cksum();
        ar.append_data(&mut header, format!("{rel}/"), &[] as &[u8])?;
    } else if ft.is_symlink() {
        let target = fs::read_link(full)?;
        let mut header = base_header(tar::EntryType::Symlink, 0o777);
        header.set_size(0);
        header.set_cksum();
        ar.append_link(&mut header, rel, &target)?;
    } else {
        return Err(CoreError::UnsupportedEntry {
            path: full.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use stowage_schema::parse_app_str;

    fn sample_app() -> ComposeApp {
        parse_app_str("services:\n  web:\n    image: a@sha256:abc\n").unwrap()
    }

    fn entry_names(data: &[u8]) -> Vec<String> {
        let mut ar = tar::Archive::new(GzDecoder::new(data));
        ar.entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn kv(key: &str, value: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut m = BTreeMap::new();
        m.insert(key.to_owned(), value.to_vec());
        m
    }

    #[test]
    fn bundle_carries_all_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("docker-compose.yml"), "ignored").unwrap();
        fs::write(dir.path().join("config.toml"), "x = 1").unwrap();

        let data = BundleBuilder::build(
            &sample_app(),
            &kv("web/default", b"rev1"),
            &kv("web/default", b"{}"),
            &kv("app.service", b"[Unit]"),
            dir.path(),
        )
        .unwrap();

        let names = entry_names(&data);
        assert!(names.contains(&"content/web/default".to_owned()));
        assert!(names.contains(&"specs/web/default".to_owned()));
        assert!(names.contains(&"units/app.service".to_owned()));
        assert!(names.contains(&"docker-compose.json".to_owned()));
        assert!(names.contains(&"config.toml".to_owned()));
        // The YAML source is replaced by the canonical JSON.
        assert!(!names.contains(&"docker-compose.yml".to_owned()));
    }

    #[test]
    fn ignore_file_filters_and_excludes_itself() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".stowageignore"), "# scratch\n*.log\n").unwrap();
        fs::write(dir.path().join("debug.log"), "noisy").unwrap();
        fs::write(dir.path().join("keep.txt"), "kept").unwrap();

        let data = BundleBuilder::build(
            &sample_app(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            dir.path(),
        )
        .unwrap();

        let names = entry_names(&data);
        assert!(names.contains(&"keep.txt".to_owned()));
        assert!(!names.contains(&"debug.log".to_owned()));
        assert!(!names.contains(&".stowageignore".to_owned()));
    }

    #[test]
    fn identical_inputs_produce_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("conf")).unwrap();
        fs::write(dir.path().join("conf/site.conf"), "server {}").unwrap();

        let build = || {
            BundleBuilder::build(
                &sample_app(),
                &kv("web/default", b"rev1"),
                &kv("web/default", b"{}"),
                &BTreeMap::new(),
                dir.path(),
            )
            .unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn invalid_ignore_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".stowageignore"), "[unclosed\n").unwrap();

        let err = BundleBuilder::build(
            &sample_app(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            &BTreeMap::new(),
            dir.path(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidIgnorePattern { .. }));
    }
}
