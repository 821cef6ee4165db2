//! MQTT topic layout under the configurable base topic.

use crate::settings::DeviceSettings;

pub const SUFFIX_TEMPERATURE: &str = "temperature";
pub const SUFFIX_HUMIDITY: &str = "humidity";
pub const SUFFIX_INLET: &str = "inlet";
pub const SUFFIX_STATUS: &str = "status";
pub const SUFFIX_CMD_MODE: &str = "cmnd/mode";
pub const SUFFIX_CMD_DEVICE_STATE: &str = "cmnd/state";
pub const SUFFIX_CMD_DESIRED_TEMPERATURE: &str = "cmnd/desired-temperature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub temperature: String,
    pub humidity: String,
    pub inlet: String,
    pub status: String,
    pub cmd_mode: String,
    pub cmd_device_state: String,
    pub cmd_desired_temperature: String,
}

impl Topics {
    pub fn new(base_topic: &str) -> Self {
        let base = base_topic.trim().trim_matches('/');
        let join = |suffix: &str| {
            if base.is_empty() {
                suffix.to_string()
            } else {
                format!("{base}/{suffix}")
            }
        };

        Self {
            temperature: join(SUFFIX_TEMPERATURE),
            humidity: join(SUFFIX_HUMIDITY),
            inlet: join(SUFFIX_INLET),
            status: join(SUFFIX_STATUS),
            cmd_mode: join(SUFFIX_CMD_MODE),
            cmd_device_state: join(SUFFIX_CMD_DEVICE_STATE),
            cmd_desired_temperature: join(SUFFIX_CMD_DESIRED_TEMPERATURE),
        }
    }

    /// The topics the device subscribes to for post-boot settings changes.
    pub fn commands(&self) -> [&str; 3] {
        [
            &self.cmd_mode,
            &self.cmd_device_state,
            &self.cmd_desired_temperature,
        ]
    }

    /// Applies an incoming command publication to `settings`. Returns true
    /// when a field changed and should be persisted.
    pub fn handle_command(
        &self,
        settings: &mut DeviceSettings,
        topic: &str,
        payload: &str,
    ) -> bool {
        if topic == self.cmd_mode {
            settings.apply_mode(payload)
        } else if topic == self.cmd_device_state {
            settings.apply_device_state(payload)
        } else if topic == self.cmd_desired_temperature {
            settings.apply_desired_temperature(payload)
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_suffixes_under_the_base_topic() {
        let topics = Topics::new("home/fancoil");

        assert_eq!(topics.temperature, "home/fancoil/temperature");
        assert_eq!(topics.cmd_mode, "home/fancoil/cmnd/mode");
        assert_eq!(
            topics.commands(),
            [
                "home/fancoil/cmnd/mode",
                "home/fancoil/cmnd/state",
                "home/fancoil/cmnd/desired-temperature",
            ]
        );
    }

    #[test]
    fn tolerates_stray_slashes_and_empty_base() {
        assert_eq!(Topics::new("/fancoil/").humidity, "fancoil/humidity");
        assert_eq!(Topics::new("").status, "status");
    }

    #[test]
    fn routes_commands_to_the_matching_field() {
        let topics = Topics::new("fancoil");
        let mut settings = DeviceSettings::default();

        assert!(topics.handle_command(&mut settings, "fancoil/cmnd/mode", "cold"));
        assert_eq!(settings.mode, "cold");

        assert!(topics.handle_command(&mut settings, "fancoil/cmnd/state", "on"));
        assert_eq!(settings.device_state, "on");

        assert!(topics.handle_command(
            &mut settings,
            "fancoil/cmnd/desired-temperature",
            "24.5"
        ));
        assert_eq!(settings.desired_temperature, "24.5");
    }

    #[test]
    fn ignores_unknown_topics_and_invalid_payloads() {
        let topics = Topics::new("fancoil");
        let mut settings = DeviceSettings::default();
        let before = settings.clone();

        assert!(!topics.handle_command(&mut settings, "fancoil/temperature", "21.0"));
        assert!(!topics.handle_command(&mut settings, "fancoil/cmnd/mode", "auto"));
        assert!(!topics.handle_command(
            &mut settings,
            "fancoil/cmnd/desired-temperature",
            "120"
        ));
        assert_eq!(settings, before);
    }
}
