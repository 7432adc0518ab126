/// An IEEE 11073-20601 16-bit short float (SFLOAT).
///
/// The little-endian word packs a 12-bit two's-complement mantissa in bits 0-11
/// and a 4-bit two's-complement base-10 exponent in bits 12-15, so the encoded
/// value is `mantissa * 10^exponent`.
///
/// The reserved special values (NaN, NRes, +/-INF) are not singled out; they
/// decode as ordinary mantissas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SFloat {
    pub mantissa: i16,
    pub exponent: i8,
}

impl SFloat {
    const MANTISSA_MASK: u16 = 0x0FFF;
    const MANTISSA_SIGN: i16 = 0x0800;
    const EXPONENT_SIGN: i8 = 0x08;

    pub fn from_raw(raw: u16) -> Self {
        let mut mantissa = (raw & Self::MANTISSA_MASK) as i16;
        if mantissa >= Self::MANTISSA_SIGN {
            mantissa -= 0x1000;
        }

        let mut exponent = (raw >> 12) as i8;
        if exponent >= Self::EXPONENT_SIGN {
            exponent -= 0x10;
        }

        Self { mantissa, exponent }
    }

    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self::from_raw(u16::from_le_bytes(bytes))
    }

    /// `mantissa * 10^(exponent + shift)` rounded half-to-even to an integer.
    ///
    /// Shifting the decimal point before rounding keeps the whole computation in
    /// integers, e.g. `scaled(5)` turns a kg/L concentration into mg/dL.
    /// Returns `None` if the result does not fit an `i64`.
    pub fn scaled(&self, shift: i32) -> Option<i64> {
        let power = self.exponent as i32 + shift;
        let mantissa = self.mantissa as i64;
        if power >= 0 {
            10i64
                .checked_pow(power as u32)
                .and_then(|scale| mantissa.checked_mul(scale))
        } else {
            // An SFLOAT mantissa has at most 4 decimal digits, anything smaller rounds to zero.
            let divisor = 10i64.checked_pow(power.unsigned_abs()).unwrap_or(i64::MAX);
            Some(round_half_even_div(mantissa, divisor))
        }
    }
}

/// Integer division `numerator / denominator` rounded half-to-even.
///
/// `denominator` must be positive.
pub(crate) fn round_half_even_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator.div_euclid(denominator);
    let remainder = numerator.rem_euclid(denominator);
    let twice = remainder as i128 * 2;
    let denominator = denominator as i128;
    if twice > denominator || (twice == denominator && quotient % 2 != 0) {
        quotient + 1
    } else {
        quotient
    }
}

#[test]
fn test_mantissa_sign_boundary() {
    assert_eq!(SFloat::from_raw(0x0FFF).mantissa, -1);
    assert_eq!(SFloat::from_raw(0x07FF).mantissa, 2047);
    assert_eq!(SFloat::from_raw(0x0800).mantissa, -2048);
    assert_eq!(SFloat::from_raw(0x0FFF).exponent, 0);
}

#[test]
fn test_exponent_sign() {
    assert_eq!(SFloat::from_raw(0xD000).exponent, -3);
    assert_eq!(SFloat::from_raw(0x3000).exponent, 3);
    assert_eq!(SFloat::from_raw(0x8000).exponent, -8);
    assert_eq!(SFloat::from_raw(0x7000).exponent, 7);
}

#[test]
fn test_from_le_bytes() {
    // 0xB00B: exponent -5, mantissa 11
    let sfloat = SFloat::from_le_bytes([0x0B, 0xB0]);
    assert_eq!(sfloat, SFloat { mantissa: 11, exponent: -5 });
}

#[test]
fn test_scaled_exact() {
    let sfloat = SFloat { mantissa: 104, exponent: -5 };
    assert_eq!(sfloat.scaled(5), Some(104));
    assert_eq!(sfloat.scaled(7), Some(10400));

    let sfloat = SFloat { mantissa: -3, exponent: 2 };
    assert_eq!(sfloat.scaled(0), Some(-300));
}

#[test]
fn test_scaled_rounds_half_even() {
    assert_eq!(SFloat { mantissa: 125, exponent: -1 }.scaled(0), Some(12));
    assert_eq!(SFloat { mantissa: 135, exponent: -1 }.scaled(0), Some(14));
    assert_eq!(SFloat { mantissa: 136, exponent: -1 }.scaled(0), Some(14));
    assert_eq!(SFloat { mantissa: -125, exponent: -1 }.scaled(0), Some(-12));
    assert_eq!(SFloat { mantissa: -136, exponent: -1 }.scaled(0), Some(-14));
    assert_eq!(SFloat { mantissa: 2047, exponent: -8 }.scaled(-4), Some(0));
}

#[test]
fn test_round_half_even_div() {
    assert_eq!(round_half_even_div(5, 2), 2);
    assert_eq!(round_half_even_div(7, 2), 4);
    assert_eq!(round_half_even_div(-5, 2), -2);
    assert_eq!(round_half_even_div(-7, 2), -4);
    assert_eq!(round_half_even_div(10, 3), 3);
    assert_eq!(round_half_even_div(11, 3), 4);
}
