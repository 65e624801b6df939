use super::{describe, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use std::path::Path;
use stowage_core::check_supported;
use stowage_schema::load_app_dir;

/// Load and validate the compose file, then run the allowlist pre-check.
/// No registry traffic.
pub fn run(app_dir: &Path) -> Result<u8, String> {
    let pb = spinner("checking compose file");
    let app = match load_app_dir(app_dir) {
        Ok(app) => app,
        Err(e) => {
            spin_fail(&pb, "compose file invalid");
            return Err(format!("compose error: {e}"));
        }
    };
    if let Err(e) = check_supported(&app) {
        spin_fail(&pb, "unsupported compose feature");
        return Err(describe(&e));
    }
    spin_ok(
        &pb,
        &format!("{} service(s) ready to publish", app.services.len()),
    );
    Ok(EXIT_SUCCESS)
}
