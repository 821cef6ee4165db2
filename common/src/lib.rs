pub mod provisioning;
pub mod sampling;
pub mod settings;
pub mod topics;

pub use provisioning::{
    apply_submission, portal_fields, BootstrapOutcome, PortalField, PortalSubmission,
};
pub use sampling::{SensorChannel, SensorKind, SensorSet};
pub use settings::{DeviceSettings, SettingsError};
pub use topics::Topics;
