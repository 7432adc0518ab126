use crate::device_time::DeviceTime;
use crate::error::DecodeError;
use crate::glucose_reading::Reading;
use crate::message::sfloat::SFloat;

/// The concentration unit selected by flag bit 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcentrationUnit {
    /// kg/L, reported to consumers as mg/dL.
    KilogramsPerLitre,
    /// mol/L, reported to consumers as mmol/L.
    MolesPerLitre,
}

/// A decoded Glucose Measurement characteristic notification.
///
/// The layout is:
///
/// Start Byte | End Byte | Meaning
/// 0          | 0        | Flags
/// 1          | 2        | Sequence number (LE)
/// 3          | 9        | Base time: year (LE u16), month, day, hour, minute, second
/// 10         | 11       | Time offset in minutes (LE i16), only if flag bit 0 is set
/// x          | x+1      | Glucose concentration (SFLOAT)
///
/// Anything after the concentration (type and sample location, sensor status)
/// is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlucoseMeasurement {
    pub sequence_number: u16,
    /// Kept as reported, even when the meter's clock was never set.
    pub base_time: DeviceTime,
    /// Parsed for diagnostics but never applied to `base_time`.
    pub time_offset_minutes: Option<i16>,
    pub concentration: SFloat,
    pub unit: ConcentrationUnit,
}

impl GlucoseMeasurement {
    const FLAG_TIME_OFFSET_PRESENT: u8 = 0x01;
    const FLAG_UNIT_MOL_PER_L: u8 = 0x04;

    const BASE_TIME_AT: usize = 3;
    const TIME_OFFSET_AT: usize = 10;
    const MIN_LEN: usize = 12;
    const TIME_OFFSET_LEN: usize = 2;

    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let flags = *data.first().ok_or(DecodeError::TooShort {
            expected: Self::MIN_LEN,
            actual: 0,
        })?;
        let time_offset_present = flags & Self::FLAG_TIME_OFFSET_PRESENT != 0;

        let expected = if time_offset_present {
            Self::MIN_LEN + Self::TIME_OFFSET_LEN
        } else {
            Self::MIN_LEN
        };
        if data.len() < expected {
            return Err(DecodeError::TooShort {
                expected,
                actual: data.len(),
            });
        }

        let sequence_number = u16::from_le_bytes([data[1], data[2]]);
        let base_time = Self::parse_base_time(&data[Self::BASE_TIME_AT..Self::TIME_OFFSET_AT]);

        let (time_offset_minutes, concentration_at) = if time_offset_present {
            let offset = i16::from_le_bytes([data[Self::TIME_OFFSET_AT], data[Self::TIME_OFFSET_AT + 1]]);
            (Some(offset), Self::TIME_OFFSET_AT + Self::TIME_OFFSET_LEN)
        } else {
            (None, Self::TIME_OFFSET_AT)
        };

        let concentration = SFloat::from_le_bytes([data[concentration_at], data[concentration_at + 1]]);
        let unit = if flags & Self::FLAG_UNIT_MOL_PER_L != 0 {
            ConcentrationUnit::MolesPerLitre
        } else {
            ConcentrationUnit::KilogramsPerLitre
        };

        Ok(Self {
            sequence_number,
            base_time,
            time_offset_minutes,
            concentration,
            unit,
        })
    }

    fn parse_base_time(bytes: &[u8]) -> DeviceTime {
        DeviceTime::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6]])
    }

    /// Convert to a reading, deriving the other unit from the reported one.
    pub fn to_reading(&self) -> Result<Reading, DecodeError> {
        let out_of_range = DecodeError::OutOfRange {
            mantissa: self.concentration.mantissa,
            exponent: self.concentration.exponent,
        };
        match self.unit {
            ConcentrationUnit::KilogramsPerLitre => {
                // 1 kg/L == 10^5 mg/dL
                let mgdl = self.concentration.scaled(5).ok_or(out_of_range.clone())?;
                let mgdl = i32::try_from(mgdl).map_err(|_| out_of_range)?;
                Ok(Reading::from_mgdl(self.base_time, mgdl))
            }
            ConcentrationUnit::MolesPerLitre => {
                // 1 mol/L == 10^3 mmol/L == 10^4 tenths
                let tenths = self.concentration.scaled(4).ok_or(out_of_range.clone())?;
                let tenths = i32::try_from(tenths).map_err(|_| out_of_range)?;
                Ok(Reading::from_mmol_tenths(self.base_time, tenths))
            }
        }
    }
}

/// Decode a Glucose Measurement notification payload into a reading.
pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
    GlucoseMeasurement::parse(payload)?.to_reading()
}

#[cfg(test)]
fn base_time() -> DeviceTime {
    DeviceTime {
        year: 2024,
        month: 3,
        day: 15,
        hour: 8,
        minute: 30,
        second: 0,
    }
}

#[cfg(test)]
fn payload(flags: u8, raw_concentration: u16) -> Vec<u8> {
    let mut data = vec![flags, 0x01, 0x00, 0xe8, 0x07, 0x03, 0x0f, 0x08, 0x1e, 0x00];
    if flags & 0x01 != 0 {
        data.extend_from_slice(&[0x3c, 0x00]);
    }
    data.extend_from_slice(&raw_concentration.to_le_bytes());
    data
}

#[test]
fn test_decode_kg_per_litre() {
    // 104e-5 kg/L
    let data = hex::decode("000100e807030f081e0068b0").unwrap();
    let reading = decode(&data).unwrap();
    assert_eq!(reading.timestamp(), base_time());
    assert_eq!(reading.timestamp_text(), "2024-03-15 08:30:00");
    assert_eq!(reading.glucose_mgdl(), 104);
    assert_eq!(reading.glucose_mmol_tenths(), 58);
}

#[test]
fn test_decode_mol_per_litre_with_time_offset() {
    // 58e-4 mol/L, time offset +60 min present but not applied
    let data = hex::decode("050200e807030f081e003c003ac0").unwrap();
    let measurement = GlucoseMeasurement::parse(&data).unwrap();
    assert_eq!(measurement.sequence_number, 2);
    assert_eq!(measurement.time_offset_minutes, Some(60));
    assert_eq!(measurement.unit, ConcentrationUnit::MolesPerLitre);

    let reading = measurement.to_reading().unwrap();
    assert_eq!(reading.timestamp(), base_time());
    assert_eq!(reading.glucose_mmol_tenths(), 58);
    assert_eq!(reading.glucose_mgdl(), 105);
}

#[test]
fn test_decode_other_exponent() {
    // 12e-4 kg/L == 120 mg/dL
    let reading = decode(&payload(0x00, 0xC00C)).unwrap();
    assert_eq!(reading.glucose_mgdl(), 120);
    assert_eq!(reading.glucose_mmol_tenths(), 67);
}

#[test]
fn test_decode_ignores_trailing_fields() {
    let mut data = payload(0x02, 0xB068);
    data.push(0x11);
    assert_eq!(decode(&data).unwrap().glucose_mgdl(), 104);
}

#[test]
fn test_kg_per_litre_mmol_is_derived_from_mgdl() {
    for mantissa in 40u16..=500 {
        let reading = decode(&payload(0x00, 0xB000 | mantissa)).unwrap();
        assert_eq!(reading.glucose_mgdl(), mantissa as i32);
        let expected = (reading.glucose_mgdl() as f64 / 18.0182 * 10.0).round() as i32;
        assert_eq!(reading.glucose_mmol_tenths(), expected, "mantissa {mantissa}");
    }
}

#[test]
fn test_mol_per_litre_mgdl_is_derived_from_mmol() {
    for mantissa in 22u16..=277 {
        let reading = decode(&payload(0x04, 0xC000 | mantissa)).unwrap();
        assert_eq!(reading.glucose_mmol_tenths(), mantissa as i32);
        let expected = (reading.glucose_mmol_tenths() as f64 / 10.0 * 18.0182).round() as i32;
        assert_eq!(reading.glucose_mgdl(), expected, "mantissa {mantissa}");
    }
}

#[test]
fn test_decode_too_short() {
    let data = payload(0x00, 0xB068);
    for len in 0..data.len() {
        let result = decode(&data[..len]);
        assert!(matches!(result, Err(DecodeError::TooShort { .. })), "len {len}");
    }
}

#[test]
fn test_decode_time_offset_needs_two_more_bytes() {
    let data = payload(0x00, 0xB068);
    let mut with_flag = data.clone();
    with_flag[0] = 0x01;
    assert_eq!(
        decode(&with_flag),
        Err(DecodeError::TooShort { expected: 14, actual: 12 })
    );
}

#[test]
fn test_decode_unset_clock() {
    // year, month and day 0 mean "not known" to the meter
    let data = hex::decode("000100000000000000000068b0").unwrap();
    let reading = decode(&data).unwrap();
    assert_eq!(reading.timestamp_text(), "0000-00-00 00:00:00");
    assert_eq!(reading.timestamp().to_naive(), None);
    assert_eq!(reading.glucose_mgdl(), 104);
    assert_eq!(reading.glucose_mmol_tenths(), 58);
}

#[test]
fn test_decode_keeps_impossible_base_time() {
    let mut data = payload(0x00, 0xB068);
    data[5] = 13;
    let reading = decode(&data).unwrap();
    assert_eq!(reading.timestamp().month, 13);
    assert_eq!(reading.timestamp_text(), "2024-13-15 08:30:00");
}

#[test]
fn test_decode_out_of_range() {
    // 2047e7 kg/L
    assert!(matches!(
        decode(&payload(0x00, 0x77FF)),
        Err(DecodeError::OutOfRange { mantissa: 2047, exponent: 7 })
    ));
    assert!(matches!(
        decode(&payload(0x04, 0x77FF)),
        Err(DecodeError::OutOfRange { .. })
    ));
}
