pub mod check;
pub mod completions;
pub mod man_pages;
pub mod pin;
pub mod publish;

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use stowage_core::CoreError;
use stowage_remote::RegistryConfig;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_COMPOSE_ERROR: u8 = 2;

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Turn a pipeline error into the CLI's message, prefixing compose-level
/// problems so main can map them to their own exit code.
pub fn describe(err: &CoreError) -> String {
    match err {
        CoreError::Schema(_)
        | CoreError::UnsupportedField { .. }
        | CoreError::TerminalNotSupported { .. }
        | CoreError::AlreadyPinned { .. }
        | CoreError::NoCommand { .. } => format!("compose error: {err}"),
        other => other.to_string(),
    }
}

/// Registry config: an explicit token flag beats the config file; a missing
/// config file means anonymous access.
pub fn registry_config(token: Option<&str>) -> Result<RegistryConfig, String> {
    match token {
        Some(token) => Ok(RegistryConfig::new().with_token(token)),
        None => RegistryConfig::load_default().map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_level_errors_get_the_prefix() {
        let err = CoreError::UnsupportedField {
            service: "web".to_owned(),
            field: "mem_limit".to_owned(),
            value: "512m".to_owned(),
        };
        assert!(describe(&err).starts_with("compose error:"));
    }

    #[test]
    fn other_errors_pass_through() {
        let err = CoreError::MissingTarget;
        assert!(!describe(&err).starts_with("compose error:"));
    }

    #[test]
    fn token_flag_wins() {
        let config = registry_config(Some("t0")).unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("t0"));
    }
}
