//! Tests for the record filter

use std::net::{Ipv4Addr, Ipv6Addr};

use flowcast_protocol::{MarRecord, Transport};

use super::*;

fn flow(proto: u8, sport: u16, dport: u16) -> FlowRecord {
    let mut record = FlowRecord::flow();
    record.flow = Some(FlowKey::V4 {
        src: Ipv4Addr::new(192, 0, 2, 1),
        dst: Ipv4Addr::new(198, 51, 100, 7),
        proto,
        sport,
        dport,
        src_mask: 0,
        dst_mask: 0,
    });
    record
}

fn filter(expr: &str) -> RecordFilter {
    RecordFilter::compile(expr).unwrap()
}

// ============================================================================
// Compile tests
// ============================================================================

#[test]
fn test_compile_normalizes_whitespace() {
    assert_eq!(filter("  tcp   and  port 80 ").expression(), "tcp and port 80");
}

#[test]
fn test_compile_errors() {
    assert_eq!(RecordFilter::compile("   "), Err(FilterError::Empty));
    assert_eq!(
        RecordFilter::compile("bogus"),
        Err(FilterError::UnknownTerm("bogus".into()))
    );
    assert_eq!(
        RecordFilter::compile("port"),
        Err(FilterError::MissingValue { term: "port" })
    );
    assert_eq!(
        RecordFilter::compile("port http"),
        Err(FilterError::invalid("port", "http"))
    );
    assert_eq!(
        RecordFilter::compile("tcp port 80"),
        Err(FilterError::UnknownTerm("port".into()))
    );
    assert!(RecordFilter::compile("tcp and").is_err());
    assert!(RecordFilter::compile("src bogus 1").is_err());
}

#[test]
fn test_from_str() {
    let parsed: RecordFilter = "udp".parse().unwrap();
    assert_eq!(parsed, filter("udp"));
}

// ============================================================================
// Matching tests
// ============================================================================

#[test]
fn test_protocol_terms() {
    let tcp = flow(6, 1000, 443);
    assert!(filter("tcp").matches(&tcp));
    assert!(!filter("udp").matches(&tcp));
    assert!(filter("proto 6").matches(&tcp));
    assert!(filter("not icmp").matches(&tcp));
}

#[test]
fn test_kind_terms() {
    let mar = FlowRecord::management(0x20, MarRecord::default());
    assert!(filter("mar").matches(&mar));
    assert!(!filter("far").matches(&mar));
    assert!(filter("far").matches(&flow(6, 1, 2)));
    // no flow key, so protocol terms fail
    assert!(!filter("tcp").matches(&mar));
}

#[test]
fn test_host_terms_respect_direction() {
    let record = flow(17, 53, 5353);
    assert!(filter("host 198.51.100.7").matches(&record));
    assert!(filter("src host 192.0.2.1").matches(&record));
    assert!(!filter("src host 198.51.100.7").matches(&record));
    assert!(filter("dst host 198.51.100.7").matches(&record));
    assert!(!filter("host 10.0.0.1").matches(&record));
}

#[test]
fn test_port_terms() {
    let record = flow(6, 40000, 22);
    assert!(filter("port 22").matches(&record));
    assert!(filter("dst port 22").matches(&record));
    assert!(!filter("src port 22").matches(&record));
    assert!(filter("tcp and not port 80").matches(&record));
    assert!(!filter("tcp and not port 22").matches(&record));
}

#[test]
fn test_ipv6_host() {
    let mut record = FlowRecord::flow();
    record.flow = Some(FlowKey::V6 {
        src: Ipv6Addr::LOCALHOST,
        dst: "2001:db8::5".parse().unwrap(),
        proto: 58,
        sport: 0,
        dport: 0,
        flow_label: 0,
    });
    assert!(filter("dst host 2001:db8::5 and proto 58").matches(&record));
}

#[test]
fn test_srcid_term() {
    let mut record = flow(6, 1, 2);
    record.transport = Some(Transport {
        source: Some(SourceIdentity::Int(77)),
        ..Default::default()
    });
    assert!(filter("srcid 77").matches(&record));
    assert!(!filter("srcid 78").matches(&record));

    let mar = FlowRecord::management(
        0x20,
        MarRecord {
            source: SourceIdentity::Int(77),
            ..Default::default()
        },
    );
    assert!(filter("srcid 77").matches(&mar));
}
