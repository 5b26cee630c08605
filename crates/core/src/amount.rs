//! Integer amounts carried as decimal strings.
//!
//! Capacities and balances routinely exceed `u64` (token amounts have 18
//! decimals), so they travel through the system as canonical decimal
//! strings: ASCII digits only, no sign, no leading zeros except `"0"`.
//! Comparison works on the string form directly.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Returns true if `value` is a non-negative integer in canonical form.
pub fn is_canonical_decimal(value: &str) -> bool {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    value == "0" || !value.starts_with('0')
}

/// Numeric ordering of two canonical decimal strings.
///
/// A shorter string is always smaller; equal lengths compare
/// lexicographically. Only valid for inputs without leading zeros.
pub fn cmp_decimal_strings(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Return the numerically smaller of two canonical decimal strings.
///
/// # Example
///
/// ```
/// use circles_core::min_decimal_string;
///
/// assert_eq!(min_decimal_string("80", "50"), "50");
/// assert_eq!(min_decimal_string("100000000000000000000", "99"), "99");
/// ```
pub fn min_decimal_string<'a>(a: &'a str, b: &'a str) -> &'a str {
    match cmp_decimal_strings(a, b) {
        Ordering::Greater => b,
        _ => a,
    }
}

/// Round a capacity down to leave a buffer below the exact on-chain value.
///
/// The low `buffer_decimals - 1` digits are dropped and the remaining prefix
/// is decremented by one, borrowing through trailing zeros. The result is
/// therefore expressed in units of `10^(buffer_decimals - 1)` and, scaled
/// back, is never above the input and never more than `10^buffer_decimals`
/// below it. Values with fewer than `buffer_decimals + 1` digits are
/// returned unchanged.
///
/// # Example
///
/// ```
/// use circles_core::reduce_capacity_precision;
///
/// assert_eq!(reduce_capacity_precision("10", 1), "9");
/// assert_eq!(reduce_capacity_precision("1000000000000000", 15), "9");
/// assert_eq!(reduce_capacity_precision("42", 5), "42");
/// ```
pub fn reduce_capacity_precision(value: &str, buffer_decimals: usize) -> String {
    if buffer_decimals == 0 || value.len() < buffer_decimals + 1 {
        return value.to_string();
    }

    let keep = value.len() - buffer_decimals + 1;
    let mut digits: Vec<u8> = value.as_bytes()[..keep].to_vec();

    // Borrow across a run of zeros.
    for digit in digits.iter_mut().rev() {
        if *digit == b'0' {
            *digit = b'9';
        } else {
            *digit -= 1;
            break;
        }
    }

    let first_significant = digits
        .iter()
        .position(|d| *d != b'0')
        .unwrap_or(digits.len());
    let reduced = &digits[first_significant..];

    if reduced.is_empty() {
        "0".to_string()
    } else {
        String::from_utf8_lossy(reduced).into_owned()
    }
}

/// A non-negative integer amount in canonical decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Amount(String);

impl Amount {
    /// Parse and validate a decimal amount.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if !is_canonical_decimal(&value) {
            return Err(CoreError::InvalidAmount(value));
        }
        Ok(Amount(value))
    }

    /// The zero amount.
    pub fn zero() -> Self {
        Amount("0".to_string())
    }

    /// Whether this amount is zero.
    pub fn is_zero(&self) -> bool {
        self.0 == "0"
    }

    /// Decimal string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the decimal string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// The smaller of two amounts.
    pub fn min(self, other: Amount) -> Amount {
        match cmp_decimal_strings(&self.0, &other.0) {
            Ordering::Greater => other,
            _ => self,
        }
    }
}

impl Ord for Amount {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_decimal_strings(&self.0, &other.0)
    }
}

impl PartialOrd for Amount {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<U256> for Amount {
    fn from(value: U256) -> Self {
        Amount(value.to_string())
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Amount(value.to_string())
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Amount::new(s)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        Amount::new(value).map_err(|e| serde::de::Error::custom(format!("{}", e)))
    }
}
