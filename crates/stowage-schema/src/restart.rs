use crate::SchemaError;

/// Translate a compose `restart` value into a systemd `Restart=` value.
///
/// Total over its input: an unrecognized policy is a reportable error, never
/// a panic, so a config typo in one service cannot abort unit generation for
/// the whole application.
pub fn systemd_restart(compose_restart: &str) -> Result<&'static str, SchemaError> {
    match compose_restart {
        "" | "no" => Ok("no"),
        "always" => Ok("always"),
        "on-failure" => Ok("on-failure"),
        // systemd has no direct equivalent; closest semantics.
        "unless-stopped" => Ok("always"),
        other => Err(SchemaError::UnknownRestartPolicy(other.to_owned())),
    }
}
