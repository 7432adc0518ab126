use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// Bluetooth SIG Glucose service.
pub const GLUCOSE_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001808_0000_1000_8000_00805f9b34fb);

/// Glucose Measurement characteristic (notify).
pub const GLUCOSE_MEASUREMENT_UUID: Uuid = Uuid::from_u128(0x00002a18_0000_1000_8000_00805f9b34fb);

/// Substring of the advertised name used when the meter does not advertise its service.
pub const DEFAULT_NAME_HINT: &str = "Accu";

/// Protocol identifiers and timing of the acquisition cycle.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub service_uuid: Uuid,
    pub measurement_uuid: Uuid,
    pub name_hint: String,
    /// How long to look for the glucose service in advertisements
    pub service_scan_timeout: Duration,
    /// How long to look for `name_hint` once the service scan came up empty
    pub name_scan_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long to stay connected while the meter pushes its records
    pub dwell: Duration,
    /// Pause between cycles, and after a failed one
    pub idle_delay: Duration,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            service_uuid: GLUCOSE_SERVICE_UUID,
            measurement_uuid: GLUCOSE_MEASUREMENT_UUID,
            name_hint: DEFAULT_NAME_HINT.to_string(),
            service_scan_timeout: Duration::from_secs(5),
            name_scan_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(20),
            dwell: Duration::from_secs(10),
            idle_delay: Duration::from_secs(2),
        }
    }
}

#[test]
fn test_profile_uuids() {
    assert_eq!(
        GLUCOSE_SERVICE_UUID,
        Uuid::parse_str("00001808-0000-1000-8000-00805f9b34fb").unwrap()
    );
    assert_eq!(
        GLUCOSE_MEASUREMENT_UUID,
        Uuid::parse_str("00002a18-0000-1000-8000-00805f9b34fb").unwrap()
    );
}

#[test]
fn test_partial_config_keeps_defaults() {
    let config: AcquisitionConfig =
        serde_json::from_str(r#"{"name_hint": "Contour", "dwell": {"secs": 30, "nanos": 0}}"#).unwrap();
    assert_eq!(config.name_hint, "Contour");
    assert_eq!(config.dwell, Duration::from_secs(30));
    assert_eq!(config.connect_timeout, Duration::from_secs(20));
    assert_eq!(config.service_uuid, GLUCOSE_SERVICE_UUID);
}
