//! Systemd unit generation for the bundled application.
//!
//! One aggregate `<app>.service` target-style unit wants a
//! `<app>_<service>.service` per compose service. Per-service units get
//! their `Restart=` from the compose restart policy; an unrecognized policy
//! is a hard error, not a fallback.

use crate::CoreError;
use std::collections::BTreeMap;
use stowage_schema::{systemd_restart, ComposeApp};

/// Render every unit file for `app`, keyed by unit file name.
pub fn generate_units(
    app: &ComposeApp,
    app_name: &str,
) -> Result<BTreeMap<String, Vec<u8>>, CoreError> {
    let mut units = BTreeMap::new();

    let mut aggregate = String::new();
    aggregate.push_str("[Unit]\n");
    aggregate.push_str(&format!("Description={app_name} compose application\n"));
    for service in app.services.keys() {
        aggregate.push_str(&format!("Wants={app_name}_{service}.service\n"));
    }
    aggregate.push_str("\n[Service]\nType=oneshot\nExecStart=/bin/true\nRemainAfterExit=yes\n");
    aggregate.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    units.insert(format!("{app_name}.service"), aggregate.into_bytes());

    for (service, description) in &app.services {
        let restart = systemd_restart(&description.restart)?;
        let mut unit = String::new();
        unit.push_str("[Unit]\n");
        unit.push_str(&format!("Description={app_name}/{service}\n"));
        unit.push_str(&format!("PartOf={app_name}.service\n"));
        unit.push_str(&format!("After={app_name}.service\n"));
        unit.push_str("\n[Service]\n");
        unit.push_str(&format!(
            "ExecStart=/usr/bin/stowage-node start {app_name} {service}\n"
        ));
        unit.push_str(&format!("Restart={restart}\n"));
        unit.push_str("\n[Install]\nWantedBy=multi-user.target\n");
        units.insert(format!("{app_name}_{service}.service"), unit.into_bytes());
    }

    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stowage_schema::parse_app_str;

    fn two_service_app(restart: &str) -> ComposeApp {
        parse_app_str(&format!(
            "services:\n  db:\n    image: a:1\n    restart: {restart}\n  web:\n    image: b:1\n"
        ))
        .unwrap()
    }

    #[test]
    fn aggregate_unit_wants_every_service() {
        let units = generate_units(&two_service_app("always"), "shop").unwrap();
        let aggregate = String::from_utf8(units["shop.service"].clone()).unwrap();
        assert!(aggregate.contains("Wants=shop_db.service"));
        assert!(aggregate.contains("Wants=shop_web.service"));
        assert!(aggregate.contains("Type=oneshot"));
    }

    #[test]
    fn restart_policy_maps_to_systemd() {
        let units = generate_units(&two_service_app("unless-stopped"), "shop").unwrap();
        let db = String::from_utf8(units["shop_db.service"].clone()).unwrap();
        assert!(db.contains("Restart=always"));
        // Default (empty) restart maps to no.
        let web = String::from_utf8(units["shop_web.service"].clone()).unwrap();
        assert!(web.contains("Restart=no"));
    }

    #[test]
    fn unknown_restart_policy_is_an_error() {
        let err = generate_units(&two_service_app("sometimes"), "shop").unwrap_err();
        assert!(matches!(
            err,
            CoreError::Schema(stowage_schema::SchemaError::UnknownRestartPolicy(_))
        ));
    }
}
