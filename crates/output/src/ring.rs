//! Ring command buffer for line-oriented client commands
//!
//! Bytes read from a client socket are appended as they arrive. Line breaks
//! become NUL terminators on the way in, so a `\r\n` pair leaves one empty
//! remnant that the next dequeue skips.
//!
//! ```text
//!   head                      head + len
//!    │                            │
//!    ▼                            ▼
//!  ┌───┬───┬───┬───┬───┬───┬───┬───┬───┐
//!  │ S │ T │ A │ R │ T │ : │\0 │   │   │   ← wraps at capacity
//!  └───┴───┴───┴───┴───┴───┴───┴───┴───┘
//! ```
//!
//! The buffer is owned by a single session and is not synchronized.

use crate::error::RingError;

/// Default ring capacity in bytes
pub const RING_CAPACITY: usize = 512;

/// Fixed-capacity byte ring holding NUL-terminated commands
#[derive(Debug, Clone)]
pub struct RingCommandBuffer {
    buf: Box<[u8]>,
    head: usize,
    len: usize,
}

impl RingCommandBuffer {
    /// Create a ring with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(RING_CAPACITY)
    }

    /// Create a ring holding at most `capacity` bytes (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently buffered
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free space in bytes
    #[inline]
    pub fn available(&self) -> usize {
        self.capacity() - self.len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Append a chunk, converting line breaks to NUL terminators
    ///
    /// Fails without modifying the buffer when the chunk is larger than the
    /// free space; the caller stops reading until commands are consumed.
    pub fn enqueue(&mut self, data: &[u8]) -> Result<(), RingError> {
        if data.len() > self.available() {
            return Err(RingError::Capacity {
                requested: data.len(),
                available: self.available(),
            });
        }
        let cap = self.capacity();
        for &b in data {
            let idx = (self.head + self.len) % cap;
            self.buf[idx] = match b {
                b'\r' | b'\n' => 0,
                b => b,
            };
            self.len += 1;
        }
        Ok(())
    }

    /// Remove the next complete command
    ///
    /// Leading NULs are discarded first. Returns `Ok(None)` when no
    /// terminator has arrived yet. A full buffer without any terminator can
    /// never complete, so its contents are dropped and reported as
    /// `RingError::Overflow`.
    pub fn dequeue(&mut self) -> Result<Option<String>, RingError> {
        self.skip_terminators();
        if self.len == 0 {
            return Ok(None);
        }

        let cap = self.capacity();
        let Some(end) = (0..self.len).position(|i| self.buf[(self.head + i) % cap] == 0) else {
            if self.is_full() {
                let discarded = self.len;
                self.clear();
                return Err(RingError::Overflow { discarded });
            }
            return Ok(None);
        };

        let bytes: Vec<u8> = (0..end).map(|i| self.buf[(self.head + i) % cap]).collect();
        self.head = (self.head + end + 1) % cap;
        self.len -= end + 1;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn skip_terminators(&mut self) {
        let cap = self.capacity();
        while self.len > 0 && self.buf[self.head] == 0 {
            self.head = (self.head + 1) % cap;
            self.len -= 1;
        }
    }
}

impl Default for RingCommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "ring_test.rs"]
mod tests;
