// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn bit_values_match_wire_protocol() {
    assert_eq!(EventMask::SINGLE.bits(), 0x01);
    assert_eq!(EventMask::MULTI.bits(), 0x02);
    assert_eq!(EventMask::SECTOR_ERROR.bits(), 0x04);
    assert_eq!(EventMask::DEVICE_ERROR.bits(), 0x08);
    assert_eq!(EventMask::PATH_ERROR.bits(), 0x10);
    assert_eq!(EventMask::ADAPTOR_ERROR.bits(), 0x20);
    assert_eq!(EventMask::SYNC_STATUS.bits(), 0x40);
    assert_eq!(EventMask::TIMEOUT.bits(), 0x80);
}

#[test]
fn all_errors_is_union_of_error_categories() {
    let expected = EventMask::SECTOR_ERROR
        | EventMask::DEVICE_ERROR
        | EventMask::PATH_ERROR
        | EventMask::ADAPTOR_ERROR;
    assert_eq!(EventMask::ALL_ERRORS, expected);
}

#[test]
fn wants_timeout_checks_timeout_bit_only() {
    assert!(!EventMask::DEVICE_ERROR.wants_timeout());
    assert!(EventMask::TIMEOUT.wants_timeout());
    assert!((EventMask::DEVICE_ERROR | EventMask::TIMEOUT).wants_timeout());
}

#[test]
fn union_of_registrations_matches_bitwise_or() {
    let e1 = EventMask::DEVICE_ERROR;
    let e2 = EventMask::TIMEOUT;
    assert_eq!(e1 | e2, EventMask::from_bits_truncate(0x88));
}
