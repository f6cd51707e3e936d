//! Tests for SourceIdentity

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::source::SourceIdentity;
use crate::wire::{ID_TYPE_INT, ID_TYPE_IPV4, ID_TYPE_IPV6, ID_TYPE_STRING, ID_TYPE_UUID};

const UUID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_parse_integer() {
    assert_eq!("42".parse::<SourceIdentity>().unwrap(), SourceIdentity::Int(42));
}

#[test]
fn test_parse_addresses() {
    assert_eq!(
        "10.0.0.1".parse::<SourceIdentity>().unwrap(),
        SourceIdentity::Ipv4(Ipv4Addr::new(10, 0, 0, 1))
    );
    assert_eq!(
        "2001:db8::1".parse::<SourceIdentity>().unwrap(),
        SourceIdentity::Ipv6("2001:db8::1".parse().unwrap())
    );
}

#[test]
fn test_parse_uuid() {
    let id: SourceIdentity = UUID.parse().unwrap();
    let SourceIdentity::Uuid(bytes) = id else {
        panic!("expected uuid, got {id:?}");
    };
    assert_eq!(bytes[0], 0x6b);
    assert_eq!(bytes[15], 0xc8);
    assert_eq!(id.to_string(), UUID);
}

#[test]
fn test_parse_short_string() {
    assert_eq!(
        "eth".parse::<SourceIdentity>().unwrap(),
        SourceIdentity::Str(*b"eth\0")
    );
    assert_eq!(" ab ".parse::<SourceIdentity>().unwrap().to_string(), "ab");
}

#[test]
fn test_parse_rejects_long_or_empty() {
    assert!("probe-one".parse::<SourceIdentity>().is_err());
    assert!("".parse::<SourceIdentity>().is_err());
    assert!("héé".parse::<SourceIdentity>().is_err());
}

// =============================================================================
// Wire forms
// =============================================================================

#[test]
fn test_id_types() {
    assert_eq!(SourceIdentity::Int(1).id_type(), ID_TYPE_INT);
    assert_eq!(SourceIdentity::Ipv4(Ipv4Addr::LOCALHOST).id_type(), ID_TYPE_IPV4);
    assert_eq!(SourceIdentity::Str(*b"abcd").id_type(), ID_TYPE_STRING);
    assert_eq!(SourceIdentity::Ipv6(Ipv6Addr::LOCALHOST).id_type(), ID_TYPE_IPV6);
    assert_eq!(SourceIdentity::Uuid([0; 16]).id_type(), ID_TYPE_UUID);
}

#[test]
fn test_narrowing_uses_trailing_octets() {
    let v6 = SourceIdentity::Ipv6("2001:db8::c000:0207".parse().unwrap());
    assert!(v6.is_wide());
    assert_eq!(v6.narrowed(), SourceIdentity::Ipv4(Ipv4Addr::new(192, 0, 2, 7)));
    assert_eq!(v6.word(), [192, 0, 2, 7]);

    let mut raw = [0u8; 16];
    raw[12..].copy_from_slice(&[0, 0, 1, 0]);
    assert_eq!(SourceIdentity::Uuid(raw).narrowed(), SourceIdentity::Int(256));

    let narrow = SourceIdentity::Int(9);
    assert!(!narrow.is_wide());
    assert_eq!(narrow.narrowed(), narrow);
    assert_eq!(narrow.wide_bytes(), None);
}

#[test]
fn test_from_wire_checks_length() {
    assert_eq!(
        SourceIdentity::from_wire(ID_TYPE_INT, &[0, 0, 0, 5]),
        Some(SourceIdentity::Int(5))
    );
    assert_eq!(SourceIdentity::from_wire(ID_TYPE_IPV6, &[0; 4]), None);
    assert_eq!(SourceIdentity::from_wire(0xEE, &[0; 4]), None);
}

#[test]
fn test_default_is_zero() {
    assert_eq!(SourceIdentity::default(), SourceIdentity::Int(0));
    assert_eq!(SourceIdentity::default().to_string(), "0");
}
