use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::error::CoreError;

const DECIMALS: u32 = 8;
const FACTOR: i64 = 100_000_000;

/// Signed fixed-point amount with eight decimal places.
///
/// All asset values and fees are carried as `Fixed8` so that every validator
/// computes bit-identical results. The operators saturate at the representable
/// range; totals that must report an overflow use the `checked_*` forms.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fixed8(pub i64);

impl Fixed8 {
    pub const ZERO: Fixed8 = Fixed8(0);
    pub const ONE: Fixed8 = Fixed8(FACTOR);
    /// Smallest representable amount
    pub const SATOSHI: Fixed8 = Fixed8(1);

    pub const fn from_raw(raw: i64) -> Self {
        Fixed8(raw)
    }

    /// Whole units, saturating at the representable range
    pub const fn from_units(units: i64) -> Self {
        Fixed8(units.saturating_mul(FACTOR))
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn checked_add(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_add(other.0).map(Fixed8)
    }

    pub fn checked_sub(self, other: Fixed8) -> Option<Fixed8> {
        self.0.checked_sub(other.0).map(Fixed8)
    }

    /// Sum of `values`, or `None` if it leaves the representable range
    pub fn checked_sum(values: impl IntoIterator<Item = Fixed8>) -> Option<Fixed8> {
        values
            .into_iter()
            .try_fold(Fixed8::ZERO, |total, value| total.checked_add(value))
    }

    /// `self * num / den` on the raw value, truncating toward zero.
    ///
    /// The intermediate product is widened so the multiplication cannot
    /// overflow before the division.
    pub fn mul_div(self, num: i64, den: i64) -> Fixed8 {
        if den == 0 {
            return Fixed8::ZERO;
        }
        let scaled = i128::from(self.0) * i128::from(num) / i128::from(den);
        Fixed8(scaled.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Add for Fixed8 {
    type Output = Fixed8;

    fn add(self, rhs: Fixed8) -> Fixed8 {
        Fixed8(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Fixed8 {
    fn add_assign(&mut self, rhs: Fixed8) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Fixed8 {
    type Output = Fixed8;

    fn sub(self, rhs: Fixed8) -> Fixed8 {
        Fixed8(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for Fixed8 {
    fn sub_assign(&mut self, rhs: Fixed8) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

impl Neg for Fixed8 {
    type Output = Fixed8;

    fn neg(self) -> Fixed8 {
        Fixed8(self.0.saturating_neg())
    }
}

impl Sum for Fixed8 {
    fn sum<I: Iterator<Item = Fixed8>>(iter: I) -> Fixed8 {
        iter.fold(Fixed8::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Fixed8> for Fixed8 {
    fn sum<I: Iterator<Item = &'a Fixed8>>(iter: I) -> Fixed8 {
        iter.copied().sum()
    }
}

impl fmt::Display for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let factor = FACTOR as u64;
        let frac = abs % factor;
        if frac == 0 {
            write!(f, "{}{}", sign, abs / factor)
        } else {
            let frac = format!("{:08}", frac);
            write!(f, "{}{}.{}", sign, abs / factor, frac.trim_end_matches('0'))
        }
    }
}

impl fmt::Debug for Fixed8 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed8({})", self)
    }
}

impl FromStr for Fixed8 {
    type Err = CoreError;

    /// Parses decimal notation such as `"12"`, `"0.1"` or `"-3.00000001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Deserialization(format!("invalid Fixed8 amount: {s:?}"));

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || frac.len() > DECIMALS as usize {
            return Err(invalid());
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac_raw: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = DECIMALS as usize);
            padded.parse().map_err(|_| invalid())?
        };

        let raw = whole
            .checked_mul(FACTOR)
            .and_then(|w| w.checked_add(frac_raw))
            .ok_or(CoreError::Overflow)?;
        Ok(Fixed8(if negative { -raw } else { raw }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mul_div_truncates_toward_zero() {
        assert_eq!(Fixed8(10).mul_div(3, 10), Fixed8(3));
        assert_eq!(Fixed8(9).mul_div(3, 10), Fixed8(2));
        assert_eq!(Fixed8(-9).mul_div(3, 10), Fixed8(-2));
        assert_eq!(Fixed8::ONE.mul_div(7, 10), Fixed8(70_000_000));
    }

    #[test]
    fn test_mul_div_does_not_overflow_intermediate() {
        let big = Fixed8(i64::MAX / 2);
        assert_eq!(big.mul_div(4, 10), Fixed8((i128::from(i64::MAX / 2) * 4 / 10) as i64));
    }

    #[test]
    fn test_operators_saturate_and_checked_forms_report() {
        let max = Fixed8(i64::MAX);
        assert_eq!(max + max, max);
        assert_eq!(Fixed8(i64::MIN) - Fixed8::ONE, Fixed8(i64::MIN));
        assert_eq!(-Fixed8(i64::MIN), max);

        assert_eq!(Fixed8::checked_sum([max, Fixed8::SATOSHI]), None);
        assert_eq!(
            Fixed8::checked_sum([Fixed8::ONE, Fixed8::ONE, Fixed8(-1)]),
            Some(Fixed8(199_999_999))
        );
        assert_eq!(Fixed8::checked_sum(Vec::new()), Some(Fixed8::ZERO));
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!("1".parse::<Fixed8>().unwrap(), Fixed8::ONE);
        assert_eq!("0.1".parse::<Fixed8>().unwrap(), Fixed8(10_000_000));
        assert_eq!("-2.00000001".parse::<Fixed8>().unwrap(), Fixed8(-200_000_001));
        assert_eq!(Fixed8(150_000_000).to_string(), "1.5");
        assert_eq!(Fixed8(-1).to_string(), "-0.00000001");
        assert_eq!(Fixed8::from_units(3).to_string(), "3");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Fixed8>().is_err());
        assert!(".5".parse::<Fixed8>().is_err());
        assert!("1.000000001".parse::<Fixed8>().is_err());
        assert!("1e5".parse::<Fixed8>().is_err());
        assert!("99999999999999999".parse::<Fixed8>().is_err());
    }

    #[test]
    fn test_sum() {
        let values = [Fixed8::ONE, Fixed8(5), -Fixed8(2)];
        assert_eq!(values.iter().sum::<Fixed8>(), Fixed8(FACTOR + 3));
    }
}
