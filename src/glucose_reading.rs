use serde::ser::SerializeStruct;
use serde::Serialize;
use serde::Serializer;

use crate::device_time::DeviceTime;
use crate::message::sfloat::round_half_even_div;

/// Molar mass conversion between mg/dL and mmol/L, scaled by 10^4 (18.0182).
const MGDL_PER_MMOL_E4: i64 = 180_182;

/// A single blood glucose reading as reported by the meter.
///
/// The mg/dL and mmol/L values are always derived from each other, so the only
/// way to build a `Reading` is from one of the two units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    timestamp: DeviceTime,
    glucose_mgdl: i32,
    glucose_mmol_tenths: i32,
}

impl Reading {
    /// Build a reading from a mg/dL value, deriving mmol/L.
    pub fn from_mgdl(timestamp: impl Into<DeviceTime>, glucose_mgdl: i32) -> Self {
        Self {
            timestamp: timestamp.into(),
            glucose_mgdl,
            glucose_mmol_tenths: mgdl_to_mmol_tenths(glucose_mgdl),
        }
    }

    /// Build a reading from a mmol/L value held as tenths, deriving mg/dL.
    pub fn from_mmol_tenths(timestamp: impl Into<DeviceTime>, glucose_mmol_tenths: i32) -> Self {
        Self {
            timestamp: timestamp.into(),
            glucose_mgdl: mmol_tenths_to_mgdl(glucose_mmol_tenths),
            glucose_mmol_tenths,
        }
    }

    /// Rebuild a reading from both stored values.
    ///
    /// Returns `None` unless the pair agrees in at least one derivation direction.
    pub fn restore(timestamp: impl Into<DeviceTime>, glucose_mgdl: i32, glucose_mmol_tenths: i32) -> Option<Self> {
        let timestamp = timestamp.into();
        let from_mgdl = Self::from_mgdl(timestamp, glucose_mgdl);
        if from_mgdl.glucose_mmol_tenths == glucose_mmol_tenths {
            return Some(from_mgdl);
        }
        let from_mmol = Self::from_mmol_tenths(timestamp, glucose_mmol_tenths);
        if from_mmol.glucose_mgdl == glucose_mgdl {
            return Some(from_mmol);
        }
        None
    }

    /// Device-reported local time, no timezone.
    pub fn timestamp(&self) -> DeviceTime {
        self.timestamp
    }

    pub fn glucose_mgdl(&self) -> i32 {
        self.glucose_mgdl
    }

    /// mmol/L in tenths, i.e. 5.8 mmol/L is 58.
    pub fn glucose_mmol_tenths(&self) -> i32 {
        self.glucose_mmol_tenths
    }

    pub fn glucose_mmol(&self) -> f64 {
        self.glucose_mmol_tenths as f64 / 10.0
    }

    /// mmol/L with exactly one decimal, e.g. `"5.8"` or `"-0.1"`.
    pub fn glucose_mmol_text(&self) -> String {
        let sign = if self.glucose_mmol_tenths < 0 { "-" } else { "" };
        let tenths = self.glucose_mmol_tenths.unsigned_abs();
        format!("{sign}{}.{}", tenths / 10, tenths % 10)
    }

    pub fn timestamp_text(&self) -> String {
        self.timestamp.to_string()
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut reading = serializer.serialize_struct("Reading", 3)?;
        reading.serialize_field("timestamp", &self.timestamp_text())?;
        reading.serialize_field("mgdl", &self.glucose_mgdl)?;
        reading.serialize_field("mmol", &self.glucose_mmol())?;
        reading.end()
    }
}

/// `round(mgdl / 18.0182, 1)` in tenths, half-to-even.
pub(crate) fn mgdl_to_mmol_tenths(mgdl: i32) -> i32 {
    // mgdl * 10 / 18.0182 == mgdl * 10^5 / 180182
    round_half_even_div(mgdl as i64 * 100_000, MGDL_PER_MMOL_E4) as i32
}

/// `round(mmol * 18.0182)` from tenths, half-to-even.
pub(crate) fn mmol_tenths_to_mgdl(mmol_tenths: i32) -> i32 {
    // tenths / 10 * 180182 / 10^4
    let mgdl = round_half_even_div(mmol_tenths as i64 * MGDL_PER_MMOL_E4, 100_000);
    mgdl.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

#[cfg(test)]
fn at(text: &str) -> DeviceTime {
    text.parse().unwrap()
}

#[test]
fn test_mgdl_to_mmol() {
    assert_eq!(mgdl_to_mmol_tenths(104), 58);
    assert_eq!(mgdl_to_mmol_tenths(100), 55);
    assert_eq!(mgdl_to_mmol_tenths(40), 22);
    assert_eq!(mgdl_to_mmol_tenths(500), 277);
    assert_eq!(mgdl_to_mmol_tenths(0), 0);
}

#[test]
fn test_mmol_to_mgdl() {
    assert_eq!(mmol_tenths_to_mgdl(58), 105);
    assert_eq!(mmol_tenths_to_mgdl(55), 99);
    assert_eq!(mmol_tenths_to_mgdl(100), 180);
}

#[test]
fn test_mmol_to_mgdl_exact_tie() {
    // 2500.0 mmol/L * 18.0182 == 45045.5 exactly, rounds to the even neighbour
    assert_eq!(mmol_tenths_to_mgdl(25_000), 45_046);
    assert_eq!(mmol_tenths_to_mgdl(-25_000), -45_046);
}

#[test]
fn test_reading_units_are_derived() {
    let reading = Reading::from_mgdl(at("2024-03-15 08:30:00"), 126);
    assert_eq!(reading.glucose_mmol_tenths(), 70);
    assert_eq!(reading.glucose_mmol_text(), "7.0");

    let reading = Reading::from_mmol_tenths(at("2024-03-15 08:30:00"), 70);
    assert_eq!(reading.glucose_mgdl(), 126);
}

#[test]
fn test_mmol_text_negative() {
    let reading = Reading::from_mmol_tenths(at("2024-03-15 08:30:00"), -1);
    assert_eq!(reading.glucose_mmol_text(), "-0.1");
}

#[test]
fn test_restore_accepts_either_direction() {
    let timestamp = at("2024-03-15 08:30:00");
    assert_eq!(Reading::restore(timestamp, 104, 58), Some(Reading::from_mgdl(timestamp, 104)));
    // 5.8 mmol/L derives 105 mg/dL, which itself derives 5.8 again
    assert_eq!(Reading::restore(timestamp, 105, 58), Some(Reading::from_mgdl(timestamp, 105)));
    assert_eq!(Reading::restore(timestamp, 104, 70), None);
}

#[test]
fn test_serialize() {
    let reading = Reading::from_mgdl(at("2024-03-15 08:30:00"), 104);
    let json = serde_json::to_value(reading).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"timestamp": "2024-03-15 08:30:00", "mgdl": 104, "mmol": 5.8})
    );
}

#[test]
fn test_serialize_unset_clock() {
    let reading = Reading::from_mgdl(at("0000-00-00 00:00:00"), 104);
    let json = serde_json::to_value(reading).unwrap();
    assert_eq!(json["timestamp"], "0000-00-00 00:00:00");
}
