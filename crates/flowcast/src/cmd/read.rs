//! Read command - Print the records in a native record file
//!
//! One line per record, similar to what a data-channel client would log.
//!
//! # Usage
//!
//! ```bash
//! flowcast read capture.bin                 # output to stdout
//! flowcast read capture.bin > capture.log   # redirect to file
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use flowcast_protocol::wire::{
    MAR_CAUSE_ERROR, MAR_CAUSE_START, MAR_CAUSE_STATUS, MAR_CAUSE_STOP,
};
use flowcast_protocol::{DecodedRecord, FlowKey, RecordKind, decode_all};

/// Read command arguments
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Native record file
    #[arg(value_name = "INPUT")]
    input: PathBuf,
}

/// Run the read command
pub async fn run(args: ReadArgs) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let records = decode_all(&bytes)
        .with_context(|| format!("failed to decode {}", args.input.display()))?;

    let mut out = io::stdout().lock();
    for decoded in &records {
        writeln!(out, "{}", format_record(decoded))?;
    }
    Ok(())
}

/// Format a decoded record for display
pub(crate) fn format_record(decoded: &DecodedRecord) -> String {
    let record = &decoded.record;
    let mut line = format!("v{} {}", decoded.version.as_u8(), record.kind);

    match record.kind {
        RecordKind::Management => {
            line.push(' ');
            line.push_str(cause_name(record.cause));
            if let Some(ref mar) = record.mar {
                line.push_str(&format!(
                    " source {} seq {} records {} dropped {} clients {}",
                    mar.source, mar.next_seq, mar.records, mar.dropped, mar.clients
                ));
            }
        }
        _ => {
            if let Some(ref flow) = record.flow {
                line.push(' ');
                line.push_str(&format_flow(flow));
            }
            if let Some(ref metrics) = record.metrics {
                line.push_str(&format!(
                    " pkts {}/{} bytes {}/{}",
                    metrics.src.pkts, metrics.dst.pkts, metrics.src.bytes, metrics.dst.bytes
                ));
            }
            if let Some(ref label) = record.label {
                line.push_str(&format!(" label {label:?}"));
            }
        }
    }
    line
}

fn format_flow(flow: &FlowKey) -> String {
    let (sport, dport) = flow.ports();
    match flow {
        FlowKey::V4 { src, dst, .. } => {
            format!("{src}:{sport} -> {dst}:{dport} proto {}", flow.proto())
        }
        FlowKey::V6 { src, dst, .. } => {
            format!("[{src}]:{sport} -> [{dst}]:{dport} proto {}", flow.proto())
        }
    }
}

fn cause_name(cause: u8) -> &'static str {
    match cause & 0xf0 {
        MAR_CAUSE_START => "START",
        MAR_CAUSE_STATUS => "STATUS",
        MAR_CAUSE_STOP => "STOP",
        MAR_CAUSE_ERROR => "ERROR",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use flowcast_protocol::{FlowRecord, MarRecord, WireVersion};

    use super::*;

    #[test]
    fn test_format_flow_record() {
        let mut record = FlowRecord::flow();
        record.flow = Some(FlowKey::V4 {
            src: Ipv4Addr::new(192, 0, 2, 1),
            dst: Ipv4Addr::new(192, 0, 2, 2),
            proto: 6,
            sport: 1234,
            dport: 443,
            src_mask: 24,
            dst_mask: 24,
        });
        let decoded = DecodedRecord {
            version: WireVersion::V5,
            record,
        };

        let line = format_record(&decoded);
        assert!(line.starts_with("v5 "));
        assert!(line.ends_with("192.0.2.1:1234 -> 192.0.2.2:443 proto 6"));
    }

    #[test]
    fn test_format_status_record() {
        let mar = MarRecord {
            next_seq: 7,
            clients: 2,
            ..MarRecord::default()
        };
        let decoded = DecodedRecord {
            version: WireVersion::V3,
            record: FlowRecord::management(MAR_CAUSE_STATUS, mar),
        };

        let line = format_record(&decoded);
        assert!(line.starts_with("v3 "));
        assert!(line.contains(" STATUS source 0 seq 7"));
        assert!(line.ends_with("clients 2"));
    }

    #[test]
    fn test_cause_names() {
        assert_eq!(cause_name(MAR_CAUSE_START), "START");
        assert_eq!(cause_name(0x41), "ERROR");
        assert_eq!(cause_name(0x00), "UNKNOWN");
    }
}
