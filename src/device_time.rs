use std::fmt;
use std::str::FromStr;

use chrono::Datelike;
use chrono::NaiveDate;
use chrono::NaiveDateTime;
use chrono::Timelike;
use thiserror::Error;

/// Local date and time as reported by the meter, without timezone.
///
/// Kept as the raw fields because a meter whose clock was never set reports
/// zeros for an unknown year, month or day. Such a reading is still a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid device time {0:?}, expected YYYY-MM-DD HH:MM:SS")]
pub struct ParseDeviceTimeError(String);

impl DeviceTime {
    /// Bluetooth Date Time: year (LE u16), month, day, hour, minute, second.
    pub fn from_le_bytes(bytes: [u8; 7]) -> Self {
        Self {
            year: u16::from_le_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            hour: bytes[4],
            minute: bytes[5],
            second: bytes[6],
        }
    }

    /// The calendar date-time, or `None` if a field is unknown or out of range.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?.and_hms_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
        )
    }
}

impl From<NaiveDateTime> for DeviceTime {
    fn from(time: NaiveDateTime) -> Self {
        Self {
            year: u16::try_from(time.year()).unwrap_or(0),
            month: time.month() as u8,
            day: time.day() as u8,
            hour: time.hour() as u8,
            minute: time.minute() as u8,
            second: time.second() as u8,
        }
    }
}

impl fmt::Display for DeviceTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

impl FromStr for DeviceTime {
    type Err = ParseDeviceTimeError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseDeviceTimeError(text.to_string());

        let (date, time) = text.trim().split_once(' ').ok_or_else(invalid)?;
        let date: Vec<&str> = date.split('-').collect();
        let time: Vec<&str> = time.split(':').collect();
        let ([year, month, day], [hour, minute, second]) = (date.as_slice(), time.as_slice()) else {
            return Err(invalid());
        };

        Ok(Self {
            year: year.parse().map_err(|_| invalid())?,
            month: month.parse().map_err(|_| invalid())?,
            day: day.parse().map_err(|_| invalid())?,
            hour: hour.parse().map_err(|_| invalid())?,
            minute: minute.parse().map_err(|_| invalid())?,
            second: second.parse().map_err(|_| invalid())?,
        })
    }
}

#[test]
fn test_from_le_bytes() {
    let time = DeviceTime::from_le_bytes([0xe8, 0x07, 0x03, 0x0f, 0x08, 0x1e, 0x00]);
    assert_eq!(time.to_string(), "2024-03-15 08:30:00");
    assert_eq!(
        time.to_naive(),
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(8, 30, 0)
    );
}

#[test]
fn test_unset_clock_is_kept() {
    let time = DeviceTime::from_le_bytes([0; 7]);
    assert_eq!(time.to_string(), "0000-00-00 00:00:00");
    assert_eq!(time.to_naive(), None);
}

#[test]
fn test_parse_round_trip() {
    for text in ["2024-03-15 08:30:00", "0000-00-00 00:00:00", "2024-13-40 25:61:61"] {
        assert_eq!(text.parse::<DeviceTime>().unwrap().to_string(), text);
    }
}

#[test]
fn test_parse_invalid() {
    assert!("2024-03-15".parse::<DeviceTime>().is_err());
    assert!("2024-03 08:30:00".parse::<DeviceTime>().is_err());
    assert!("2024-03-15 08:xx:00".parse::<DeviceTime>().is_err());
}

#[test]
fn test_from_naive() {
    let naive = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap().and_hms_opt(8, 30, 5).unwrap();
    let time = DeviceTime::from(naive);
    assert_eq!(time.to_string(), "2024-03-15 08:30:05");
    assert_eq!(time.to_naive(), Some(naive));
}
