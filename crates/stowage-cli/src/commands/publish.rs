use super::{describe, registry_config, EXIT_SUCCESS};
use console::style;
use std::path::Path;
use stowage_core::{Pipeline, PipelineOptions, PublishOutcome};
use stowage_remote::RegistryGateway;

pub fn run(
    app_dir: &Path,
    repo_path: &Path,
    target: Option<&str>,
    dry_run: bool,
    token: Option<&str>,
) -> Result<u8, String> {
    let gateway = RegistryGateway::new(registry_config(token)?);
    let pipeline = Pipeline::new(&gateway);

    let progress = |msg: &str| {
        println!("{} {msg}", style("→").cyan());
    };
    let outcome = pipeline
        .run(
            &PipelineOptions {
                app_dir: app_dir.to_path_buf(),
                repo_path: repo_path.to_path_buf(),
                target: target.map(str::to_owned),
                dry_run,
            },
            &progress,
        )
        .map_err(|e| describe(&e))?;

    match outcome {
        PublishOutcome::DryRun(path) => {
            println!(
                "{} bundle written to {}",
                style("✓").green(),
                path.display()
            );
        }
        PublishOutcome::Pushed { digest } => {
            println!("{} published as {digest}", style("✓").green());
        }
    }
    Ok(EXIT_SUCCESS)
}
