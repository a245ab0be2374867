use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

// Scaling factor for fixed-point arithmetic (2 decimal places)
pub const SCALE: i64 = 100;

/// Number of fractional digits carried by [Points].
const DIGITS: usize = 2;

/// Fixed-point point amount with 2 decimal places of precision.
///
/// Every conversion into `Points` rounds half away from zero, so two
/// amounts that print the same always compare equal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Points(i64);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ParsePointsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount: {0}")]
    InvalidDigit(String),
    #[error("amount out of range: {0}")]
    OutOfRange(String),
}

impl Points {
    pub const ZERO: Self = Points(0);

    /// Create from a raw count of hundredths.
    pub const fn from_cents(cents: i64) -> Self {
        Points(cents)
    }

    /// Create from a whole number of points.
    pub const fn from_int(value: i64) -> Self {
        Points(value * SCALE)
    }

    /// Create from a float, rounding to the nearest hundredth (half away from zero).
    ///
    /// Returns `None` for non-finite values or values outside the representable range.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let scaled = (value.abs() * SCALE as f64 + 0.5).floor();
        if scaled >= i64::MAX as f64 {
            return None;
        }
        let magnitude = scaled as i64;
        Some(Points(if value < 0.0 { -magnitude } else { magnitude }))
    }

    /// Get the raw scaled value
    pub fn cents(self) -> i64 {
        self.0
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Points)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Points)
    }

    /// Multiply by an integer
    pub fn checked_mul_int(self, factor: i64) -> Option<Self> {
        self.0.checked_mul(factor).map(Points)
    }

    /// Divide into `count` equal shares, rounding the share half away from zero.
    ///
    /// Returns `None` when `count` is zero.
    pub fn split(self, count: usize) -> Option<Self> {
        let count = i64::try_from(count).ok().filter(|count| *count > 0)? as i128;
        let magnitude = (self.0.unsigned_abs() as i128 * 2 + count) / (2 * count);
        Some(Points(self.0.signum() * magnitude as i64))
    }
}

impl std::ops::Neg for Points {
    type Output = Self;
    fn neg(self) -> Self {
        Points(-self.0)
    }
}

impl fmt::Display for Points {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let scale = SCALE as u64;
        write!(
            f,
            "{sign}{}.{:0width$}",
            magnitude / scale,
            magnitude % scale,
            width = DIGITS
        )
    }
}

impl FromStr for Points {
    type Err = ParsePointsError;

    /// Parses a plain decimal ("10", "-3.335", "+.5") without going through a float.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.as_bytes().first() {
            Some(b'-') => (true, &trimmed[1..]),
            Some(b'+') => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };
        let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(ParsePointsError::Empty);
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(ParsePointsError::InvalidDigit(s.to_string()));
        }

        let out_of_range = || ParsePointsError::OutOfRange(s.to_string());
        let mut cents: i64 = 0;
        for digit in whole.bytes() {
            cents = cents
                .checked_mul(10)
                .and_then(|c| c.checked_add((digit - b'0') as i64))
                .ok_or_else(out_of_range)?;
        }
        cents = cents.checked_mul(SCALE).ok_or_else(out_of_range)?;

        let mut fraction_digits = fraction.bytes();
        let mut unit = SCALE / 10;
        for _ in 0..DIGITS {
            if let Some(digit) = fraction_digits.next() {
                cents = cents
                    .checked_add((digit - b'0') as i64 * unit)
                    .ok_or_else(out_of_range)?;
            }
            unit /= 10;
        }
        if matches!(fraction_digits.next(), Some(digit) if digit >= b'5') {
            cents = cents.checked_add(1).ok_or_else(out_of_range)?;
        }

        Ok(Points(if negative { -cents } else { cents }))
    }
}

impl Serialize for Points {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.to_f64())
    }
}

struct PointsVisitor;

impl de::Visitor<'_> for PointsVisitor {
    type Value = Points;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a decimal amount")
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Points, E> {
        Points::from_f64(value).ok_or_else(|| E::custom(format!("amount out of range: {value}")))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Points, E> {
        value
            .checked_mul(SCALE)
            .map(Points)
            .ok_or_else(|| E::custom(format!("amount out of range: {value}")))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Points, E> {
        i64::try_from(value)
            .map_err(|_| E::custom(format!("amount out of range: {value}")))
            .and_then(|value| self.visit_i64(value))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Points, E> {
        value.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Points {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PointsVisitor)
    }
}

impl Write for Points {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for Points {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Points(i64::read(reader)?))
    }
}

impl FixedSize for Points {
    const SIZE: usize = i64::SIZE;
}
