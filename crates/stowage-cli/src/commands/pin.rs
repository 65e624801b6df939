use super::{describe, registry_config, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::Path;
use stowage_core::{check_supported, ImagePinner};
use stowage_remote::RegistryGateway;
use stowage_schema::load_app_dir;

/// Pin every service image and print the canonical pinned JSON to stdout.
pub fn run(app_dir: &Path, token: Option<&str>) -> Result<u8, String> {
    let mut app = load_app_dir(app_dir).map_err(|e| format!("compose error: {e}"))?;
    check_supported(&app).map_err(|e| describe(&e))?;

    let gateway = RegistryGateway::new(registry_config(token)?);
    let pinner = ImagePinner::new(&gateway);

    let pb = spinner("resolving image digests");
    match pinner.pin(&mut app, stowage_core::silent()) {
        Ok(_) => spin_ok(&pb, "images pinned"),
        Err(e) => {
            spin_fail(&pb, "pinning failed");
            return Err(describe(&e));
        }
    }

    let json = app
        .canonical_json()
        .map_err(|e| format!("compose error: {e}"))?;
    println!("{json}");
    Ok(EXIT_SUCCESS)
}
