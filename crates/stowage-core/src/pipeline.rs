//! Sequential publishing pipeline.
//!
//! One pass, fail-fast: load and validate the app, run the allowlist
//! pre-check, pin images, commit filesystem trees, translate specs,
//! generate units, pack the bundle, publish. No stage starts before the
//! previous one finished, and the first error aborts the run with the
//! offending service or stage in its message.

use crate::bundle::BundleBuilder;
use crate::committer::FilesystemCommitter;
use crate::pinner::ImagePinner;
use crate::publisher::{BundlePublisher, PublishOutcome};
use crate::spec::{check_supported, RuntimeSpecTranslator};
use crate::units::generate_units;
use crate::{CoreError, Progress};
use std::path::PathBuf;
use stowage_remote::RegistryGateway;
use stowage_schema::{load_app_dir, ImageRef};
use tracing::info;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Directory holding `docker-compose.yml` and the app's source tree.
    pub app_dir: PathBuf,
    /// Tree repository the filesystems are committed into.
    pub repo_path: PathBuf,
    /// Registry reference to publish under. May be omitted on a dry run.
    pub target: Option<String>,
    /// Write the bundle next to the app instead of pushing it.
    pub dry_run: bool,
}

pub struct Pipeline<'a> {
    gateway: &'a RegistryGateway,
}

impl<'a> Pipeline<'a> {
    pub fn new(gateway: &'a RegistryGateway) -> Self {
        Self { gateway }
    }

    pub fn run(
        &self,
        opts: &PipelineOptions,
        progress: Progress<'_>,
    ) -> Result<PublishOutcome, CoreError> {
        let target = match &opts.target {
            Some(reference) => Some(ImageRef::parse(reference)?),
            None if opts.dry_run => None,
            None => return Err(CoreError::MissingTarget),
        };

        progress("loading application");
        let mut app = load_app_dir(&opts.app_dir)?;
        check_supported(&app)?;

        let app_name = app_name(&app, &opts.app_dir);
        info!("publishing '{app_name}' ({} services)", app.services.len());

        let pinner = ImagePinner::new(self.gateway);
        let pinned = pinner.pin(&mut app, progress)?;

        let committer = FilesystemCommitter::new(self.gateway);
        let commits = committer.commit_all(&app, &pinned, &opts.repo_path, progress)?;

        progress("translating runtime specs");
        let specs = RuntimeSpecTranslator::translate_all(&app, &pinned)?;
        let units = generate_units(&app, &app_name)?;

        progress("building bundle");
        let bundle = BundleBuilder::build(&app, &commits, &specs, &units, &opts.app_dir)?;

        let publisher = BundlePublisher::new(self.gateway);
        publisher.publish(
            target.as_ref(),
            &bundle,
            opts.dry_run,
            &opts.app_dir,
            progress,
        )
    }
}

/// Application name, preferring the compose `name` field over the app
/// directory's base name.
fn app_name(app: &stowage_schema::ComposeApp, app_dir: &std::path::Path) -> String {
    if let Some(name) = &app.name {
        if !name.is_empty() {
            return name.clone();
        }
    }
    app_dir
        .file_name()
        .map_or_else(|| "app".to_owned(), |n| n.to_string_lossy().into_owned())
}
