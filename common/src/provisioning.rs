//! Captive-portal onboarding model.
//!
//! The portal form is described as data ([`PortalField`]) so the device can
//! render it pre-populated from the current settings, and a submission is
//! applied back through the same bounded-copy rules the settings document
//! uses. The overall result of a bootstrap attempt is an explicit
//! [`BootstrapOutcome`]; the caller persists settings exactly when the
//! outcome says they changed.

use serde::Deserialize;

use crate::settings::{self, DeviceSettings};

/// One editable input of the onboarding form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalField {
    pub id: &'static str,
    pub label: &'static str,
    pub value: String,
    pub max_len: usize,
}

/// Form descriptors for the six connection fields, pre-populated from
/// `settings`. Max lengths match the fields' storage capacities.
pub fn portal_fields(settings: &DeviceSettings) -> Vec<PortalField> {
    vec![
        PortalField {
            id: "server",
            label: "MQTT server",
            value: settings.mqtt_server.clone(),
            max_len: settings::MQTT_SERVER_MAX_LEN,
        },
        PortalField {
            id: "port",
            label: "MQTT port",
            value: settings.mqtt_port.clone(),
            max_len: settings::MQTT_PORT_MAX_LEN,
        },
        PortalField {
            id: "clientName",
            label: "Client name",
            value: settings.mqtt_client_id.clone(),
            max_len: settings::MQTT_CLIENT_ID_MAX_LEN,
        },
        PortalField {
            id: "user",
            label: "MQTT user",
            value: settings.mqtt_user.clone(),
            max_len: settings::MQTT_USER_MAX_LEN,
        },
        PortalField {
            id: "password",
            label: "MQTT pass",
            value: settings.mqtt_pass.clone(),
            max_len: settings::MQTT_PASS_MAX_LEN,
        },
        PortalField {
            id: "baseTopic",
            label: "Main topic",
            value: settings.base_topic.clone(),
            max_len: settings::BASE_TOPIC_MAX_LEN,
        },
    ]
}

/// A completed portal form. WiFi credentials go straight to the radio
/// configuration; the remaining fields feed [`apply_submission`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PortalSubmission {
    #[serde(rename = "wifiSsid")]
    pub wifi_ssid: String,
    #[serde(rename = "wifiPass", default)]
    pub wifi_pass: String,
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: String,
    #[serde(rename = "clientName", default)]
    pub client_name: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(rename = "baseTopic", default)]
    pub base_topic: String,
}

/// Copies the submitted connection fields into `settings`. Empty submitted
/// values leave the corresponding field untouched. Returns whether anything
/// actually changed, which is what decides a settings save later.
pub fn apply_submission(settings: &mut DeviceSettings, submission: &PortalSubmission) -> bool {
    let mut changed = false;

    if !submission.server.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.mqtt_server,
            settings::MQTT_SERVER_MAX_LEN,
            &submission.server,
        );
    }
    if !submission.port.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.mqtt_port,
            settings::MQTT_PORT_MAX_LEN,
            &submission.port,
        );
    }
    if !submission.client_name.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.mqtt_client_id,
            settings::MQTT_CLIENT_ID_MAX_LEN,
            &submission.client_name,
        );
    }
    if !submission.user.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.mqtt_user,
            settings::MQTT_USER_MAX_LEN,
            &submission.user,
        );
    }
    if !submission.password.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.mqtt_pass,
            settings::MQTT_PASS_MAX_LEN,
            &submission.password,
        );
    }
    if !submission.base_topic.is_empty() {
        changed |= settings::copy_bounded(
            &mut settings.base_topic,
            settings::BASE_TOPIC_MAX_LEN,
            &submission.base_topic,
        );
    }

    changed
}

/// Result of a connectivity bootstrap attempt.
///
/// Replaces a mutable should-save flag: settings are written back exactly
/// when a successful connection reports they changed, never on a
/// stored-credential connect and never on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Connected { settings_changed: bool },
    Failed,
}

impl BootstrapOutcome {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn needs_save(self) -> bool {
        matches!(
            self,
            Self::Connected {
                settings_changed: true
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fields_are_prepopulated_with_capacities() {
        let mut settings = DeviceSettings::default();
        settings.mqtt_server = "broker.local".to_string();

        let fields = portal_fields(&settings);

        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0].id, "server");
        assert_eq!(fields[0].value, "broker.local");
        assert_eq!(fields[0].max_len, settings::MQTT_SERVER_MAX_LEN);
        assert_eq!(fields[5].id, "baseTopic");
        assert_eq!(fields[5].value, "fancoil");
        assert_eq!(fields[5].max_len, settings::BASE_TOPIC_MAX_LEN);
    }

    #[test]
    fn unchanged_submission_reports_no_change() {
        let mut settings = DeviceSettings::default();
        settings.mqtt_server = "broker.local".to_string();

        // Echoes the current values, the way a pre-populated form does.
        let submission = PortalSubmission {
            wifi_ssid: "home".to_string(),
            server: "broker.local".to_string(),
            port: "1883".to_string(),
            base_topic: "fancoil".to_string(),
            ..PortalSubmission::default()
        };

        assert!(!apply_submission(&mut settings, &submission));
    }

    #[test]
    fn empty_submitted_values_leave_fields_untouched() {
        let mut settings = DeviceSettings::default();
        settings.mqtt_user = "mqtt".to_string();

        let submission = PortalSubmission {
            wifi_ssid: "home".to_string(),
            server: "new-broker".to_string(),
            ..PortalSubmission::default()
        };

        assert!(apply_submission(&mut settings, &submission));
        assert_eq!(settings.mqtt_server, "new-broker");
        assert_eq!(settings.mqtt_user, "mqtt");
        assert_eq!(settings.mqtt_port, "1883");
    }

    #[test]
    fn submission_values_are_bounded() {
        let mut settings = DeviceSettings::default();
        let submission = PortalSubmission {
            wifi_ssid: "home".to_string(),
            server: "x".repeat(settings::MQTT_SERVER_MAX_LEN + 5),
            ..PortalSubmission::default()
        };

        assert!(apply_submission(&mut settings, &submission));
        assert_eq!(settings.mqtt_server.len(), settings::MQTT_SERVER_MAX_LEN);
    }

    #[test]
    fn submission_parses_portal_payload() {
        let submission: PortalSubmission = serde_json::from_str(
            r#"{"wifiSsid":"home","wifiPass":"pw","server":"broker.local",
                "port":"1883","clientName":"fancoil-1","user":"u",
                "password":"p","baseTopic":"home/fancoil"}"#,
        )
        .unwrap();

        assert_eq!(submission.wifi_ssid, "home");
        assert_eq!(submission.client_name, "fancoil-1");
        assert_eq!(submission.base_topic, "home/fancoil");
    }

    #[test]
    fn outcome_drives_save_decision() {
        assert!(BootstrapOutcome::Connected {
            settings_changed: true
        }
        .needs_save());
        assert!(!BootstrapOutcome::Connected {
            settings_changed: false
        }
        .needs_save());
        assert!(!BootstrapOutcome::Failed.needs_save());
        assert!(!BootstrapOutcome::Failed.is_connected());
    }
}
