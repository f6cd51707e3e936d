//! Shared test doubles

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::OutputSink;

/// How a `MockSink` answers writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkMode {
    Accept,
    Block,
    Fail,
    Zero,
}

/// In-memory sink; clones share the captured bytes and mode
#[derive(Clone)]
pub struct MockSink {
    written: Arc<Mutex<Vec<u8>>>,
    mode: Arc<Mutex<SinkMode>>,
    max_chunk: usize,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            mode: Arc::new(Mutex::new(SinkMode::Accept)),
            max_chunk: usize::MAX,
        }
    }

    /// Accept at most `n` bytes per write
    pub fn with_max_chunk(mut self, n: usize) -> Self {
        self.max_chunk = n;
        self
    }

    pub fn set_mode(&self, mode: SinkMode) {
        *self.mode.lock() = mode;
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub fn written_len(&self) -> usize {
        self.written.lock().len()
    }

    pub fn boxed(&self) -> Box<dyn OutputSink> {
        Box::new(self.clone())
    }
}

impl OutputSink for MockSink {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self.mode.lock() {
            SinkMode::Accept => {
                let n = buf.len().min(self.max_chunk);
                self.written.lock().extend_from_slice(&buf[..n]);
                Ok(n)
            }
            SinkMode::Block => Err(io::ErrorKind::WouldBlock.into()),
            SinkMode::Fail => Err(io::ErrorKind::BrokenPipe.into()),
            SinkMode::Zero => Ok(0),
        }
    }

    fn kind(&self) -> &'static str {
        "mock"
    }
}
