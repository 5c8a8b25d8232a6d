// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Fingerprint;

#[test]
fn from_hex_string() {
    assert_eq!(
        Fingerprint::from_hex_string(
            "0123456789abcdeffedcba98765432100000000000000000ffffffffffffffff",
        )
        .unwrap()
        .as_bytes(),
        &[
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54,
            0x32, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff,
        ],
    )
}

#[test]
fn from_hex_string_rejects_uppercase() {
    Fingerprint::from_hex_string(
        "0123456789ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef",
    )
    .expect_err("Want err");
}

#[test]
fn from_hex_string_rejects_invalid_chars() {
    Fingerprint::from_hex_string(
        "q123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
    )
    .expect_err("Want err");
}

#[test]
fn from_hex_string_rejects_odd_length() {
    Fingerprint::from_hex_string("abc").expect_err("Want err");
}

#[test]
fn from_bytes_rejects_oversize() {
    Fingerprint::from_bytes(&[0xab; 65]).expect_err("Want err");
}

#[test]
fn to_hex() {
    let hex = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    assert_eq!(Fingerprint::from_hex_string(hex).unwrap().to_hex(), hex);
}

#[test]
fn display_is_hex() {
    let hex = "d41d8cd98f00b204e9800998ecf8427e";
    assert_eq!(
        format!("{}", Fingerprint::from_hex_string(hex).unwrap()),
        hex
    );
}

#[test]
fn equality_ignores_padding() {
    let a = Fingerprint::from_bytes(&[0xab; 16]).unwrap();
    let b = Fingerprint::from_bytes(&[0xab; 20]).unwrap();
    assert_ne!(a, b);
    assert_eq!(a, Fingerprint::from_hex_string(&"ab".repeat(16)).unwrap());
}

#[test]
fn ordering_matches_hex_ordering() {
    // A shorter hash that is a prefix of a longer one sorts first, exactly as the hex strings
    // would with a separator appended.
    let short = Fingerprint::from_bytes(&[0xaa, 0xbb]).unwrap();
    let long = Fingerprint::from_bytes(&[0xaa, 0xbb, 0xcc]).unwrap();
    assert!(short < long);
}
