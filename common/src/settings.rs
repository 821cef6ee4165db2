//! Device settings and their flat key-value persistence document.
//!
//! Settings are persisted as a flat JSON object of string values. Loading
//! updates fields one by one: keys missing from the document keep whatever
//! value the field already had, so a partial document never clears state.
//! Every copy into a field is bounded by that field's capacity.

use serde_json::Value;
use thiserror::Error;

pub const MQTT_SERVER_KEY: &str = "mqttServer";
pub const MQTT_PORT_KEY: &str = "mqttPort";
pub const MQTT_CLIENT_ID_KEY: &str = "mqttClientId";
pub const MQTT_USER_KEY: &str = "mqttUser";
pub const MQTT_PASS_KEY: &str = "mqttPass";
pub const BASE_TOPIC_KEY: &str = "baseTopic";
pub const MODE_KEY: &str = "mode";
pub const DEVICE_STATE_KEY: &str = "deviceState";
pub const DESIRED_TEMPERATURE_KEY: &str = "desiredTemperature";

pub const MQTT_SERVER_MAX_LEN: usize = 40;
pub const MQTT_PORT_MAX_LEN: usize = 8;
pub const MQTT_CLIENT_ID_MAX_LEN: usize = 32;
pub const MQTT_USER_MAX_LEN: usize = 16;
pub const MQTT_PASS_MAX_LEN: usize = 16;
pub const BASE_TOPIC_MAX_LEN: usize = 32;
pub const MODE_MAX_LEN: usize = 8;
pub const DEVICE_STATE_MAX_LEN: usize = 8;
pub const DESIRED_TEMPERATURE_MAX_LEN: usize = 8;

/// Accepted setpoint range for the desired-temperature command, in Celsius.
pub const DESIRED_TEMPERATURE_MIN_C: f32 = 15.0;
pub const DESIRED_TEMPERATURE_MAX_C: f32 = 35.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("settings document root is not an object")]
    NotAnObject,
}

/// The nine persisted configuration fields. The first six come from the
/// provisioning portal; mode, device state, and desired temperature are also
/// settable post-boot over MQTT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub mqtt_server: String,
    pub mqtt_port: String,
    pub mqtt_client_id: String,
    pub mqtt_user: String,
    pub mqtt_pass: String,
    pub base_topic: String,
    pub mode: String,
    pub device_state: String,
    pub desired_temperature: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            mqtt_server: String::new(),
            mqtt_port: "1883".to_string(),
            mqtt_client_id: "fancoil".to_string(),
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
            base_topic: "fancoil".to_string(),
            mode: "heat".to_string(),
            device_state: "off".to_string(),
            desired_temperature: "22.0".to_string(),
        }
    }
}

impl DeviceSettings {
    /// Parses `raw` as a settings document and applies it field by field.
    /// On error the settings are left exactly as they were.
    pub fn apply_json(&mut self, raw: &[u8]) -> Result<(), SettingsError> {
        let doc: Value = serde_json::from_slice(raw)?;
        if !doc.is_object() {
            return Err(SettingsError::NotAnObject);
        }
        self.apply_document(&doc);
        Ok(())
    }

    /// Updates each field individually from `doc`; absent keys keep the
    /// field's prior value.
    pub fn apply_document(&mut self, doc: &Value) {
        copy_json_value(&mut self.mqtt_server, MQTT_SERVER_MAX_LEN, doc.get(MQTT_SERVER_KEY));
        copy_json_value(&mut self.mqtt_port, MQTT_PORT_MAX_LEN, doc.get(MQTT_PORT_KEY));
        copy_json_value(
            &mut self.mqtt_client_id,
            MQTT_CLIENT_ID_MAX_LEN,
            doc.get(MQTT_CLIENT_ID_KEY),
        );
        copy_json_value(&mut self.mqtt_user, MQTT_USER_MAX_LEN, doc.get(MQTT_USER_KEY));
        copy_json_value(&mut self.mqtt_pass, MQTT_PASS_MAX_LEN, doc.get(MQTT_PASS_KEY));
        copy_json_value(&mut self.base_topic, BASE_TOPIC_MAX_LEN, doc.get(BASE_TOPIC_KEY));

        // Settable after boot, so they are persisted alongside the
        // connection fields.
        copy_json_value(&mut self.mode, MODE_MAX_LEN, doc.get(MODE_KEY));
        copy_json_value(&mut self.device_state, DEVICE_STATE_MAX_LEN, doc.get(DEVICE_STATE_KEY));
        copy_json_value(
            &mut self.desired_temperature,
            DESIRED_TEMPERATURE_MAX_LEN,
            doc.get(DESIRED_TEMPERATURE_KEY),
        );
    }

    /// Serializes all nine fields into the flat settings document.
    pub fn to_document(&self) -> Value {
        let mut doc = serde_json::Map::new();
        doc.insert(MQTT_SERVER_KEY.to_string(), Value::String(self.mqtt_server.clone()));
        doc.insert(MQTT_PORT_KEY.to_string(), Value::String(self.mqtt_port.clone()));
        doc.insert(
            MQTT_CLIENT_ID_KEY.to_string(),
            Value::String(self.mqtt_client_id.clone()),
        );
        doc.insert(MQTT_USER_KEY.to_string(), Value::String(self.mqtt_user.clone()));
        doc.insert(MQTT_PASS_KEY.to_string(), Value::String(self.mqtt_pass.clone()));
        doc.insert(BASE_TOPIC_KEY.to_string(), Value::String(self.base_topic.clone()));
        doc.insert(MODE_KEY.to_string(), Value::String(self.mode.clone()));
        doc.insert(DEVICE_STATE_KEY.to_string(), Value::String(self.device_state.clone()));
        doc.insert(
            DESIRED_TEMPERATURE_KEY.to_string(),
            Value::String(self.desired_temperature.clone()),
        );
        Value::Object(doc)
    }

    /// Applies an operating-mode command. Unknown modes are rejected;
    /// returns whether the stored value changed.
    pub fn apply_mode(&mut self, value: &str) -> bool {
        let value = value.trim();
        let canonical = if value.eq_ignore_ascii_case("heat") {
            "heat"
        } else if value.eq_ignore_ascii_case("cold") {
            "cold"
        } else {
            return false;
        };
        copy_bounded(&mut self.mode, MODE_MAX_LEN, canonical)
    }

    /// Applies a device-state command ("on"/"off").
    pub fn apply_device_state(&mut self, value: &str) -> bool {
        let value = value.trim();
        let canonical = if value.eq_ignore_ascii_case("on") {
            "on"
        } else if value.eq_ignore_ascii_case("off") {
            "off"
        } else {
            return false;
        };
        copy_bounded(&mut self.device_state, DEVICE_STATE_MAX_LEN, canonical)
    }

    /// Applies a desired-temperature command. The payload must parse as a
    /// finite Celsius value within the accepted setpoint range.
    pub fn apply_desired_temperature(&mut self, value: &str) -> bool {
        let value = value.trim();
        match value.parse::<f32>() {
            Ok(setpoint)
                if setpoint.is_finite()
                    && (DESIRED_TEMPERATURE_MIN_C..=DESIRED_TEMPERATURE_MAX_C)
                        .contains(&setpoint) =>
            {
                copy_bounded(&mut self.desired_temperature, DESIRED_TEMPERATURE_MAX_LEN, value)
            }
            _ => false,
        }
    }
}

fn copy_json_value(dst: &mut String, max_len: usize, value: Option<&Value>) {
    // Absent or non-string values keep the field's previous contents.
    if let Some(text) = value.and_then(Value::as_str) {
        copy_bounded(dst, max_len, text);
    }
}

/// Copies `value` into `dst`, truncating at `max_len` bytes on a char
/// boundary. Returns whether `dst` actually changed.
pub(crate) fn copy_bounded(dst: &mut String, max_len: usize, value: &str) -> bool {
    let truncated = truncate_on_char_boundary(value, max_len);
    if dst == truncated {
        return false;
    }
    dst.clear();
    dst.push_str(truncated);
    true
}

fn truncate_on_char_boundary(value: &str, max_len: usize) -> &str {
    if value.len() <= max_len {
        return value;
    }
    let mut end = max_len;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn populated() -> DeviceSettings {
        DeviceSettings {
            mqtt_server: "broker.local".to_string(),
            mqtt_port: "8883".to_string(),
            mqtt_client_id: "fancoil-livingroom".to_string(),
            mqtt_user: "mqtt".to_string(),
            mqtt_pass: "secret".to_string(),
            base_topic: "home/fancoil".to_string(),
            mode: "cold".to_string(),
            device_state: "on".to_string(),
            desired_temperature: "21.5".to_string(),
        }
    }

    #[test]
    fn document_round_trips() {
        let settings = populated();
        let raw = serde_json::to_vec(&settings.to_document()).unwrap();

        let mut loaded = DeviceSettings::default();
        loaded.apply_json(&raw).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_document_keeps_prior_fields() {
        let mut settings = populated();
        settings
            .apply_json(br#"{"mqttPort":"1884","mode":"heat"}"#)
            .unwrap();

        assert_eq!(settings.mqtt_port, "1884");
        assert_eq!(settings.mode, "heat");
        // Untouched by the partial document.
        assert_eq!(settings.mqtt_server, "broker.local");
        assert_eq!(settings.desired_temperature, "21.5");
    }

    #[test]
    fn malformed_document_leaves_settings_unchanged() {
        let mut settings = populated();
        let before = settings.clone();

        assert!(settings.apply_json(b"{not json").is_err());
        assert_eq!(settings, before);

        assert!(matches!(
            settings.apply_json(b"[1,2,3]"),
            Err(SettingsError::NotAnObject)
        ));
        assert_eq!(settings, before);
    }

    #[test]
    fn non_string_values_keep_prior_contents() {
        let mut settings = populated();
        settings.apply_json(br#"{"mqttPort":1884,"mqttUser":null}"#).unwrap();

        assert_eq!(settings.mqtt_port, "8883");
        assert_eq!(settings.mqtt_user, "mqtt");
    }

    #[test]
    fn oversized_values_truncate_at_field_capacity() {
        let mut settings = DeviceSettings::default();
        let oversized = "x".repeat(MQTT_SERVER_MAX_LEN + 10);
        let doc = serde_json::json!({ "mqttServer": oversized });

        settings.apply_document(&doc);

        assert_eq!(settings.mqtt_server.len(), MQTT_SERVER_MAX_LEN);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut value = String::new();
        // Each 'é' is two bytes; an odd limit lands mid-character.
        assert!(copy_bounded(&mut value, 5, "ééééé"));
        assert_eq!(value, "éé");
    }

    #[test]
    fn mode_command_canonicalizes_and_validates() {
        let mut settings = DeviceSettings::default();

        assert!(settings.apply_mode("COLD"));
        assert_eq!(settings.mode, "cold");
        // Same canonical value again is not a change.
        assert!(!settings.apply_mode("cold"));
        assert!(!settings.apply_mode("auto"));
        assert_eq!(settings.mode, "cold");
    }

    #[test]
    fn device_state_command_accepts_on_off_only() {
        let mut settings = DeviceSettings::default();

        assert!(settings.apply_device_state(" ON "));
        assert_eq!(settings.device_state, "on");
        assert!(!settings.apply_device_state("standby"));
        assert_eq!(settings.device_state, "on");
    }

    #[test]
    fn desired_temperature_command_validates_range() {
        let mut settings = DeviceSettings::default();

        assert!(settings.apply_desired_temperature("21.5"));
        assert_eq!(settings.desired_temperature, "21.5");

        assert!(!settings.apply_desired_temperature("50"));
        assert!(!settings.apply_desired_temperature("nan"));
        assert!(!settings.apply_desired_temperature("warm"));
        assert_eq!(settings.desired_temperature, "21.5");
    }
}
