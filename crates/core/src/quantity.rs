// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes resource quantity arithmetic.
//!
//! Admission compares and sums operator-supplied quantity strings
//! (`500m` = 0.5 core, `1Gi` = 1024 MiB), so the parser has to agree with
//! Kubernetes on suffix semantics. Values are held as integer milli-units:
//! `1` parses to 1000, `500m` to 500, `1Ki` to 1_024_000. An i128 covers
//! the full `Ei` range with room to spare.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Errors from parsing a quantity string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,
    #[error("invalid quantity {0:?}")]
    Invalid(String),
    #[error("quantity {0:?} overflows")]
    Overflow(String),
}

/// A parsed Kubernetes quantity. Ordering and equality compare the
/// canonical milli-unit value; `Display` preserves the original string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quantity {
    raw: String,
    milli: i128,
}

impl Quantity {
    pub fn parse(s: &str) -> Result<Self, QuantityError> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(QuantityError::Empty);
        }

        // Split digits (with at most one dot) from the suffix.
        let split = raw
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
            .map(|(i, _)| i)
            .unwrap_or(raw.len());
        let (number, suffix) = raw.split_at(split);
        if number.is_empty() {
            return Err(QuantityError::Invalid(raw.to_string()));
        }

        let multiplier = suffix_multiplier_milli(suffix)
            .ok_or_else(|| QuantityError::Invalid(raw.to_string()))?;

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if frac_part.contains('.') {
            return Err(QuantityError::Invalid(raw.to_string()));
        }

        let int: i128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| QuantityError::Invalid(raw.to_string()))?
        };

        let mut milli = int
            .checked_mul(multiplier)
            .ok_or_else(|| QuantityError::Overflow(raw.to_string()))?;

        if !frac_part.is_empty() {
            let frac: i128 =
                frac_part.parse().map_err(|_| QuantityError::Invalid(raw.to_string()))?;
            let scale = 10_i128
                .checked_pow(frac_part.len() as u32)
                .ok_or_else(|| QuantityError::Overflow(raw.to_string()))?;
            let frac_milli = frac
                .checked_mul(multiplier)
                .ok_or_else(|| QuantityError::Overflow(raw.to_string()))?
                / scale;
            milli = milli
                .checked_add(frac_milli)
                .ok_or_else(|| QuantityError::Overflow(raw.to_string()))?;
        }

        Ok(Self { raw: raw.to_string(), milli })
    }

    /// Canonical value in milli-units (`1` → 1000, `500m` → 500).
    pub fn milli(&self) -> i128 {
        self.milli
    }

    /// Zero quantity, the identity for [`Quantity::checked_add`].
    pub fn zero() -> Self {
        Self { raw: "0".to_string(), milli: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    pub fn checked_add(&self, other: &Quantity) -> Result<Quantity, QuantityError> {
        let milli = self
            .milli
            .checked_add(other.milli)
            .ok_or_else(|| QuantityError::Overflow(format!("{} + {}", self.raw, other.raw)))?;
        // Render the sum canonically in milli-units so it stays parseable.
        let raw = if milli % 1000 == 0 {
            format!("{}", milli / 1000)
        } else {
            format!("{milli}m")
        };
        Ok(Quantity { raw, milli })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.milli.cmp(&other.milli)
    }
}

impl TryFrom<String> for Quantity {
    type Error = QuantityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Quantity::parse(&s)
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.raw
    }
}

impl std::str::FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

/// Multiplier that converts one unit of `suffix` into milli-units.
fn suffix_multiplier_milli(suffix: &str) -> Option<i128> {
    const KIB: i128 = 1024;
    Some(match suffix {
        "m" => 1,
        "" => 1000,
        "k" => 1000 * 1000,
        "M" => 1000 * 1000 * 1000,
        "G" => 1000 * 1000 * 1000 * 1000,
        "T" => 1000 * 1000 * 1000 * 1000 * 1000,
        "P" => 1000 * 1000 * 1000 * 1000 * 1000 * 1000,
        "E" => 1000 * 1000 * 1000 * 1000 * 1000 * 1000 * 1000,
        "Ki" => KIB * 1000,
        "Mi" => KIB * KIB * 1000,
        "Gi" => KIB * KIB * KIB * 1000,
        "Ti" => KIB * KIB * KIB * KIB * 1000,
        "Pi" => KIB * KIB * KIB * KIB * KIB * 1000,
        "Ei" => KIB * KIB * KIB * KIB * KIB * KIB * 1000,
        _ => return None,
    })
}

#[cfg(test)]
#[path = "quantity_tests.rs"]
mod tests;
