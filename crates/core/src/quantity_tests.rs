// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn q(s: &str) -> Quantity {
    Quantity::parse(s).unwrap()
}

#[test]
fn parses_milli_cpu() {
    assert_eq!(q("500m").milli(), 500);
}

#[test]
fn parses_whole_cores() {
    assert_eq!(q("2").milli(), 2000);
}

#[test]
fn parses_fractional_cores() {
    assert_eq!(q("1.5").milli(), 1500);
    assert_eq!(q("0.25").milli(), 250);
}

#[test]
fn half_core_equals_500m() {
    assert_eq!(q("0.5"), q("500m"));
}

#[test]
fn one_gi_is_1024_mi() {
    assert_eq!(q("1Gi").milli(), q("1024Mi").milli());
}

#[test]
fn decimal_and_binary_suffixes_differ() {
    // 1G = 10^9 bytes, 1Gi = 2^30 bytes
    assert!(q("1Gi") > q("1G"));
}

#[test]
fn fractional_binary_suffix() {
    assert_eq!(q("1.5Gi").milli(), q("1536Mi").milli());
}

#[test]
fn ordering_follows_value() {
    assert!(q("100m") < q("1"));
    assert!(q("512Mi") < q("1Gi"));
    assert!(q("2G") > q("1G"));
}

#[test]
fn checked_add_sums_and_stays_parseable() {
    let sum = q("500m").checked_add(&q("1.5")).unwrap();
    assert_eq!(sum.milli(), 2000);
    assert_eq!(Quantity::parse(&sum.to_string()).unwrap(), sum);
}

#[test]
fn checked_add_non_integral_sum() {
    let sum = q("100m").checked_add(&q("150m")).unwrap();
    assert_eq!(sum.to_string(), "250m");
}

#[test]
fn zero_is_identity() {
    let sum = Quantity::zero().checked_add(&q("3Gi")).unwrap();
    assert_eq!(sum, q("3Gi"));
    assert!(Quantity::zero().is_zero());
}

#[test]
fn rejects_empty_string() {
    assert_eq!(Quantity::parse(""), Err(QuantityError::Empty));
    assert_eq!(Quantity::parse("  "), Err(QuantityError::Empty));
}

#[test]
fn rejects_unknown_suffix() {
    assert!(matches!(Quantity::parse("1X"), Err(QuantityError::Invalid(_))));
    assert!(matches!(Quantity::parse("1gi"), Err(QuantityError::Invalid(_))));
}

#[test]
fn rejects_bare_suffix() {
    assert!(matches!(Quantity::parse("Mi"), Err(QuantityError::Invalid(_))));
}

#[test]
fn rejects_double_dot() {
    assert!(matches!(Quantity::parse("1.2.3"), Err(QuantityError::Invalid(_))));
}

#[test]
fn serde_round_trip() {
    let parsed: Quantity = serde_json::from_str("\"750m\"").unwrap();
    assert_eq!(parsed.milli(), 750);
    assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"750m\"");
}

#[test]
fn serde_rejects_garbage() {
    assert!(serde_json::from_str::<Quantity>("\"lots\"").is_err());
}
