//! Static output targets
//!
//! Outputs that receive records without a client connecting: a file, a UDP
//! collector, or an outbound TCP connection. Targets are written as a path
//! or a URL whose scheme picks the transport and, after a `+`, the format:
//!
//! ```text
//! /var/log/flows.bin               file, native v5
//! file+v3:///var/log/flows.v3      file, native v3
//! udp+netflow://collector:2055     UDP, NetFlow v5
//! netflow://collector              UDP, NetFlow v5, port 2055
//! tcp://[2001:db8::1]:561          outbound TCP, native v5
//! ```

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use flowcast_protocol::{DEFAULT_MONITOR_PORT, DEFAULT_NETFLOW_PORT, WireFormat};

use crate::error::SinkError;
use crate::listener::tune_stream;
use crate::session::OutputSink;

/// Outbound TCP connect deadline
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a file sink checks whether its path was rotated away
pub const REOPEN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Transport of a static output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKind {
    File(PathBuf),
    /// `host:port`
    Udp(String),
    /// `host:port`
    Tcp(String),
}

/// A parsed output target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub kind: TargetKind,
    pub format: WireFormat,
}

impl OutputTarget {
    pub fn parse(target: &str) -> Result<Self, SinkError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(SinkError::invalid(target, "empty target"));
        }

        let Some((scheme, rest)) = target.split_once("://") else {
            return Ok(Self {
                kind: TargetKind::File(PathBuf::from(target)),
                format: WireFormat::default(),
            });
        };

        let scheme = scheme.to_ascii_lowercase();
        let (transport, suffix) = match scheme.split_once('+') {
            Some((transport, suffix)) => (transport, Some(suffix)),
            None => (scheme.as_str(), None),
        };

        let format = match suffix {
            Some(suffix) => suffix
                .parse::<WireFormat>()
                .map_err(|e| SinkError::invalid(target, e))?,
            None if transport == "netflow" => WireFormat::NetflowV5,
            None => WireFormat::default(),
        };

        let default_port = match format {
            WireFormat::NetflowV5 => DEFAULT_NETFLOW_PORT,
            WireFormat::Native(_) => DEFAULT_MONITOR_PORT,
        };

        let kind = match transport {
            "file" => {
                if rest.is_empty() {
                    return Err(SinkError::invalid(target, "missing file path"));
                }
                TargetKind::File(PathBuf::from(rest))
            }
            "udp" | "netflow" => TargetKind::Udp(host_port(target, rest, default_port)?),
            "tcp" => TargetKind::Tcp(host_port(target, rest, default_port)?),
            other => {
                return Err(SinkError::invalid(target, format!("unknown scheme '{other}'")));
            }
        };

        Ok(Self { kind, format })
    }

    /// Open the transport; failures are reported to the caller as fatal
    pub async fn open(&self) -> Result<OpenedOutput, SinkError> {
        let label = self.to_string();
        match &self.kind {
            TargetKind::File(path) => {
                let sink = FileSink::open(path)?;
                let initial_mar = sink.is_empty();
                info!(output = %label, initial_mar, "file output opened");
                Ok(OpenedOutput {
                    sink: Box::new(sink),
                    format: self.format,
                    label,
                    initial_mar,
                })
            }
            TargetKind::Udp(address) => {
                let socket = UdpSocket::bind(unspecified_for(address))
                    .await
                    .map_err(|e| SinkError::open(&label, e))?;
                socket
                    .connect(address.as_str())
                    .await
                    .map_err(|e| SinkError::open(&label, e))?;
                info!(output = %label, "udp output connected");
                Ok(OpenedOutput {
                    sink: Box::new(UdpSink { socket }),
                    format: self.format,
                    label,
                    initial_mar: true,
                })
            }
            TargetKind::Tcp(address) => {
                let stream = match tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    TcpStream::connect(address.as_str()),
                )
                .await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => return Err(SinkError::open(&label, e)),
                    Err(_) => {
                        return Err(SinkError::open(
                            &label,
                            io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
                        ));
                    }
                };
                if let Ok(peer) = stream.peer_addr() {
                    tune_stream(&stream, &peer);
                }
                info!(output = %label, "tcp output connected");
                Ok(OpenedOutput {
                    sink: Box::new(stream),
                    format: self.format,
                    label,
                    initial_mar: true,
                })
            }
        }
    }
}

impl FromStr for OutputTarget {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OutputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TargetKind::File(path) => write!(f, "file+{}://{}", self.format, path.display()),
            TargetKind::Udp(address) => write!(f, "udp+{}://{address}", self.format),
            TargetKind::Tcp(address) => write!(f, "tcp+{}://{address}", self.format),
        }
    }
}

/// An opened target, ready to attach to a manager
pub struct OpenedOutput {
    pub sink: Box<dyn OutputSink>,
    pub format: WireFormat,
    pub label: String,
    /// Whether a START status record should be written first
    pub initial_mar: bool,
}

impl fmt::Debug for OpenedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedOutput")
            .field("sink", &self.sink.kind())
            .field("format", &self.format)
            .field("label", &self.label)
            .field("initial_mar", &self.initial_mar)
            .finish()
    }
}

/// Split `host[:port]`, bracketed IPv6 included, and apply the default port
fn host_port(target: &str, rest: &str, default_port: u16) -> Result<String, SinkError> {
    let rest = rest.trim_end_matches('/');
    if rest.is_empty() {
        return Err(SinkError::invalid(target, "missing host"));
    }

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let Some((host, after)) = bracketed.split_once(']') else {
            return Err(SinkError::invalid(target, "unterminated IPv6 address"));
        };
        let port = match after.strip_prefix(':') {
            Some(port) => Some(port),
            None if after.is_empty() => None,
            None => return Err(SinkError::invalid(target, "garbage after IPv6 address")),
        };
        (format!("[{host}]"), port)
    } else if rest.matches(':').count() > 1 {
        (format!("[{rest}]"), None)
    } else {
        match rest.split_once(':') {
            Some((host, port)) => (host.to_string(), Some(port)),
            None => (rest.to_string(), None),
        }
    };

    if host.is_empty() || host == "[]" {
        return Err(SinkError::invalid(target, "missing host"));
    }
    let port = match port {
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| SinkError::invalid(target, format!("invalid port '{port}'")))?,
        None => default_port,
    };
    Ok(format!("{host}:{port}"))
}

fn unspecified_for(address: &str) -> &'static str {
    if address.starts_with('[') {
        "[::]:0"
    } else {
        "0.0.0.0:0"
    }
}

impl OutputSink for TcpStream {
    #[inline]
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        TcpStream::try_write(self, buf)
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }
}

/// One datagram per buffer
#[derive(Debug)]
pub struct UdpSink {
    socket: UdpSocket,
}

impl OutputSink for UdpSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.socket.try_send(buf)
    }

    fn kind(&self) -> &'static str {
        "udp"
    }
}

/// Append-only record file, reopened when its path is rotated away
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
    file_id: Option<u64>,
    last_check: Instant,
}

impl FileSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        let file = open_append(path).map_err(|e| SinkError::open(path.display(), e))?;
        let file_id = file.metadata().ok().and_then(|m| file_id(&m));
        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_id,
            last_check: Instant::now(),
        })
    }

    /// Whether the file has no content yet
    pub fn is_empty(&self) -> bool {
        self.file.metadata().map(|m| m.len() == 0).unwrap_or(true)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reopen when the path no longer names the file being written
    pub fn reopen_if_rotated(&mut self) -> io::Result<bool> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if file_id(&meta) == self.file_id => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        self.file = open_append(&self.path)?;
        self.file_id = self.file.metadata().ok().and_then(|m| file_id(&m));
        info!(path = %self.path.display(), "output file reopened");
        Ok(true)
    }
}

impl OutputSink for FileSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.last_check.elapsed() >= REOPEN_CHECK_INTERVAL {
            self.last_check = Instant::now();
            if let Err(e) = self.reopen_if_rotated() {
                warn!(path = %self.path.display(), error = %e, "output file reopen failed");
            }
        }
        self.file.write(buf)
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    debug!(path = %path.display(), "opening output file");
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

#[cfg(test)]
#[path = "target_test.rs"]
mod tests;
