//! Round-trip tests: encode, then decode with the reference decoder

use std::net::Ipv4Addr;

use bytes::BytesMut;

use crate::decode::{decode_all, decode_record};
use crate::encode::{encode_record, quantize_histogram};
use crate::error::ProtocolError;
use crate::mar::MarRecord;
use crate::record::*;
use crate::source::SourceIdentity;
use crate::version::WireVersion;
use crate::wire::*;

fn round_trip(record: &FlowRecord, version: WireVersion) -> FlowRecord {
    let mut out = BytesMut::new();
    encode_record(record, version, &mut out).unwrap();
    let (decoded, used) = decode_record(&out).unwrap();
    assert_eq!(used, out.len());
    assert_eq!(decoded.version, version);
    decoded.record
}

fn tcp_direction(seed: u32) -> TcpDirection {
    TcpDirection {
        last_time: Timestamp::new(1_700_000_000 + seed, seed),
        status: seed + 1,
        seq_base: seed + 2,
        seq: seed + 3,
        ack: seed + 4,
        win_num: seed + 5,
        bytes: seed + 6,
        retrans: seed + 7,
        ack_bytes: seed + 8,
        win_bytes: seed + 9,
        win: 65535,
        flags: 0x1B,
        win_shift: 7,
    }
}

fn everything() -> FlowRecord {
    let mut record = FlowRecord::flow();
    record.cause = FAR_CAUSE_STOP;
    record.transport = Some(Transport {
        source: Some(SourceIdentity::Ipv6("2001:db8::42".parse().unwrap())),
        interface: *b"eth1",
        sequence: Some(0xABCD),
    });
    record.flow = Some(FlowKey::V6 {
        src: "fe80::1".parse().unwrap(),
        dst: "fe80::2".parse().unwrap(),
        proto: 17,
        sport: 53,
        dport: 5353,
        flow_label: 0xBEEF,
    });
    record.network = Some(Network {
        variant: NetworkVariant::TcpPerf,
        tcp: TcpObject {
            status: 1,
            state: 2,
            options: 3,
            syn_ack_usecs: 4,
            ack_data_usecs: 5,
            src: tcp_direction(10),
            dst: tcp_direction(20),
        },
    });
    record.time = Some(FlowTimes {
        src_start: Some(Timestamp::new(1_700_000_000, 10)),
        src_end: Some(Timestamp::new(1_700_000_030, 0)),
        dst_start: Some(Timestamp::new(1_700_000_000, 400)),
        dst_end: Some(Timestamp::new(1_700_000_029, 999_999)),
    });
    record.metrics = Some(Metrics {
        src: DirectionMetrics {
            pkts: 70_000,
            bytes: 90_000_000,
            app_bytes: 80_000_000,
        },
        dst: DirectionMetrics {
            pkts: 5,
            bytes: 300,
            app_bytes: 0,
        },
    });
    record.packet_size = Some(PacketSize {
        src_min_max: Some((64, 1514)),
        dst_min_max: Some((60, 60)),
        src_histogram: Some([3, 0, 0, 9, 30, 0, 1, 0]),
        dst_histogram: None,
    });
    record.mpls = Some(Mpls {
        src_labels: vec![16, 17],
        dst_labels: vec![18],
    });
    record.jitter = Some(Jitter {
        src_active: Some(JitterStats {
            n: 12,
            min: 0.5,
            mean: 1.25,
            stdev: 0.125,
            max: 3.0,
        }),
        dst_idle: Some(JitterStats {
            n: 3,
            min: 10.0,
            mean: 11.5,
            stdev: 1.0,
            max: 13.0,
        }),
        ..Default::default()
    });
    record.ip_attrs = Some(IpAttributes {
        src: Some(IpSide {
            ttl: 64,
            tos: 0,
            ip_id: 7,
            options: None,
        }),
        dst: Some(IpSide {
            ttl: 128,
            tos: 0xB8,
            ip_id: 9,
            options: Some(0x0102_0304),
        }),
    });
    record.label = Some("dns-mirror".to_string());
    record.geo = Some(Geolocation {
        src: Some(GeoPoint {
            lat: 37.75,
            lon: -122.5,
        }),
        dst: Some(GeoPoint { lat: -33.0, lon: 151.25 }),
    });
    record
}

// =============================================================================
// V5 round trip
// =============================================================================

#[test]
fn test_v5_round_trip_preserves_every_subrecord() {
    let original = everything();
    let decoded = round_trip(&original, WireVersion::V5);

    assert_eq!(decoded.kind, RecordKind::Flow);
    assert_eq!(decoded.cause, FAR_CAUSE_STOP);
    assert_eq!(decoded.transport, original.transport);
    assert_eq!(decoded.flow, original.flow);
    assert_eq!(decoded.network, original.network);
    assert_eq!(decoded.time, original.time);
    assert_eq!(decoded.metrics, original.metrics);
    assert_eq!(decoded.mpls, original.mpls);
    assert_eq!(decoded.jitter, original.jitter);
    assert_eq!(decoded.ip_attrs, original.ip_attrs);
    assert_eq!(decoded.label, original.label);
    assert_eq!(decoded.geo, original.geo);

    // Histograms come back quantized
    let psize = decoded.packet_size.unwrap();
    let expected = quantize_histogram(&[3, 0, 0, 9, 30, 0, 1, 0]).map(u32::from);
    assert_eq!(psize.src_min_max, Some((64, 1514)));
    assert_eq!(psize.dst_min_max, Some((60, 60)));
    assert_eq!(psize.src_histogram, Some(expected));
    assert_eq!(psize.dst_histogram, None);
}

#[test]
fn test_round_trip_records_declared_length() {
    let mut out = BytesMut::new();
    let written = encode_record(&everything(), WireVersion::V5, &mut out).unwrap();
    let (decoded, _) = decode_record(&out).unwrap();
    assert_eq!(
        decoded.record.declared_len.map(usize::from),
        Some(written / WORD_SIZE)
    );
    assert!(!decoded.record.modified);
}

#[test]
fn test_reencoding_decoded_record_is_identical() {
    let mut first = BytesMut::new();
    encode_record(&everything(), WireVersion::V5, &mut first).unwrap();
    let (decoded, _) = decode_record(&first).unwrap();

    let mut second = BytesMut::new();
    encode_record(&decoded.record, WireVersion::V5, &mut second).unwrap();
    assert_eq!(first, second);
}

// =============================================================================
// V3 round trip (lossy fields asserted explicitly)
// =============================================================================

#[test]
fn test_v3_round_trip_narrows_source_and_drops_geo() {
    let original = everything();
    let decoded = round_trip(&original, WireVersion::V3);

    let transport = decoded.transport.unwrap();
    assert_eq!(
        transport.source,
        Some(SourceIdentity::Ipv4(Ipv4Addr::new(0, 0, 0, 0x42)))
    );
    assert_eq!(transport.interface, [0; 4]);
    assert_eq!(transport.sequence, Some(0xABCD));
    assert_eq!(decoded.geo, None);

    assert_eq!(decoded.flow, original.flow);
    assert_eq!(decoded.network, original.network);
    assert_eq!(decoded.time, original.time);
    assert_eq!(decoded.metrics, original.metrics);
    assert_eq!(decoded.label, original.label);
}

// =============================================================================
// Time encodings
// =============================================================================

#[test]
fn test_time_round_trip_for_each_encoding() {
    let t = |sec, usec| Some(Timestamp::new(sec, usec));
    let cases = [
        FlowTimes {
            dst_start: t(5, 0),
            ..Default::default()
        },
        FlowTimes {
            src_start: t(5, 0),
            src_end: t(2_000, 0),
            dst_start: t(6, 0),
            ..Default::default()
        },
        FlowTimes {
            dst_start: t(5, 0),
            dst_end: t(6, 10),
            ..Default::default()
        },
        FlowTimes {
            src_start: t(9, 0),
            dst_start: t(8, 999_000),
            ..Default::default()
        },
        FlowTimes {
            src_end: t(9, 0),
            dst_start: t(8, 0),
            dst_end: t(10, 0),
            ..Default::default()
        },
    ];

    for times in cases {
        let mut record = FlowRecord::flow();
        record.time = Some(times);
        let decoded = round_trip(&record, WireVersion::V5);
        assert_eq!(decoded.time, Some(times), "{times:?}");
    }
}

#[test]
fn test_degenerate_end_decodes_as_absent() {
    let ts = Timestamp::new(100, 1);
    let mut record = FlowRecord::flow();
    record.time = Some(FlowTimes {
        src_start: Some(ts),
        src_end: Some(ts),
        ..Default::default()
    });
    let decoded = round_trip(&record, WireVersion::V5).time.unwrap();
    assert_eq!(decoded.src_start, Some(ts));
    assert_eq!(decoded.src_end, None);
}

#[test]
fn test_network_init_round_trips_repacked_fields() {
    let mut tcp = TcpObject {
        status: 0x10,
        options: 0x4,
        ..Default::default()
    };
    tcp.src.seq_base = 1000;
    tcp.src.win = 512;
    tcp.src.flags = 0x02;
    tcp.src.win_shift = 3;

    let mut record = FlowRecord::flow();
    record.network = Some(Network {
        variant: NetworkVariant::TcpInit,
        tcp,
    });
    assert_eq!(round_trip(&record, WireVersion::V5).network, record.network);
}

// =============================================================================
// Management records
// =============================================================================

#[test]
fn test_mar_round_trip() {
    let mar = MarRecord {
        status: 1,
        source: SourceIdentity::Uuid([7; 16]),
        interface: *b"mgmt",
        next_seq: 99,
        start_time: Timestamp::new(1, 2),
        now: Timestamp::new(3, 4),
        major_version: 5,
        minor_version: 1,
        report_interval: 5,
        status_interval: 60,
        pkts_rcvd: 1 << 40,
        bytes_rcvd: 1 << 50,
        drift: -5,
        records: 10,
        clients: 2,
        bufs: 3,
        bytes: 4096,
        ..Default::default()
    };
    let record = FlowRecord::management(MAR_CAUSE_STATUS, mar.clone());

    let decoded = round_trip(&record, WireVersion::V5);
    assert_eq!(decoded.mar, Some(mar.clone()));

    let decoded = round_trip(&record, WireVersion::V3);
    let v3 = decoded.mar.unwrap();
    assert_eq!(v3.source, SourceIdentity::Int(0x0707_0707));
    assert_eq!(v3.interface, [0; 4]);
    assert_eq!(v3.records, 10);
    assert_eq!(v3.next_seq, 99);
}

// =============================================================================
// Malformed input
// =============================================================================

#[test]
fn test_decode_short_input() {
    assert_eq!(
        decode_record(&[0x15, 0]).unwrap_err(),
        ProtocolError::too_short(4, 2)
    );
    assert_eq!(
        decode_record(&[0x15, 0, 0, 2, 0]).unwrap_err(),
        ProtocolError::too_short(8, 5)
    );
}

#[test]
fn test_decode_rejects_unknown_version() {
    assert_eq!(
        decode_record(&[0x17, 0, 0, 1]).unwrap_err(),
        ProtocolError::InvalidRecordType(0x17)
    );
}

#[test]
fn test_decode_rejects_zero_length_subrecord() {
    let bytes = [0x15, 0, 0, 2, DSR_METRICS, 1, 1, 0];
    let err = decode_record(&bytes).unwrap_err();
    assert!(err.is_recoverable());
}

#[test]
fn test_decode_skips_filler_and_unknown_subrecords() {
    let bytes = [
        0x15, 0, 0, 4, //
        0x7F, 0, 0, 2, 0xAA, 0xBB, 0xCC, 0xDD, //
        0, 0, 0, 0,
    ];
    let (decoded, used) = decode_record(&bytes).unwrap();
    assert_eq!(used, 16);
    assert_eq!(decoded.record.declared_len, Some(4));
    assert!(decoded.record.transport.is_none());
}

#[test]
fn test_decode_all_splits_stream() {
    let mut out = BytesMut::new();
    encode_record(&everything(), WireVersion::V5, &mut out).unwrap();
    encode_record(&FlowRecord::flow(), WireVersion::V3, &mut out).unwrap();
    let records = decode_all(&out).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].version, WireVersion::V3);
}

#[test]
fn test_padded_record_round_trips_length() {
    let mut record = FlowRecord::flow();
    record.flow = Some(FlowKey::V4 {
        src: Ipv4Addr::LOCALHOST,
        dst: Ipv4Addr::BROADCAST,
        proto: 1,
        sport: 0,
        dport: 0,
        src_mask: 32,
        dst_mask: 32,
    });
    record.declared_len = Some(12);

    let decoded = round_trip(&record, WireVersion::V5);
    assert_eq!(decoded.declared_len, Some(12));
    assert_eq!(decoded.flow, record.flow);
}
