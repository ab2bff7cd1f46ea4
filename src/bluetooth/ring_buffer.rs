// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-capacity receive ring with delimiter framing.
//!
//! Storage holds `capacity + 1` slots so that `head == tail` always means
//! empty and a full ring leaves exactly one slot unused:
//!
//! ```text
//!        T     H
//!        |     |
//!        v     v
//! +---+-+-+---+-+---+
//! |...|S| |   |1|...|
//! +---+-+-+---+-+---+
//! ```
//!
//! `readline` scans for the active separator with an incremental
//! Knuth-Morris-Pratt matcher. The scan position is kept as an offset from
//! `head`, so a frame split across several writes is never rescanned and a
//! match may straddle the wrap point.

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::constants::link::DEFAULT_SEPARATOR;

/// A frame extracted by [`RingBuffer::readline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// Bytes preceding the separator; the separator itself is dropped.
    Complete(Vec<u8>),
    /// The ring filled up before a separator arrived, so its whole content
    /// was drained. May be a truncated or run-together frame.
    Overflow(Vec<u8>),
}

impl Line {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Complete(bytes) | Self::Overflow(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(bytes) | Self::Overflow(bytes) => bytes,
        }
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow(_))
    }
}

/// Circular byte buffer shared by one producer and one consumer.
///
/// Every operation takes the buffer's own lock, so the receive task and the
/// application can use it concurrently without further synchronization.
#[derive(Debug)]
pub struct RingBuffer {
    inner: Mutex<RingInner>,
}

impl RingBuffer {
    /// Create a ring holding up to `capacity` bytes. Zero is rounded up to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner {
                slots: vec![0; capacity + 1],
                head: 0,
                tail: 0,
                search: SeparatorSearch::new(DEFAULT_SEPARATOR),
            }),
        }
    }

    /// Maximum number of bytes the ring can hold.
    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len() - 1
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Room left for writes.
    pub fn free(&self) -> usize {
        self.inner.lock().free()
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.head == inner.tail
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().is_full()
    }

    /// Copy as much of `data` as fits. Never blocks.
    ///
    /// Returns the number of bytes accepted; the caller owns the remainder
    /// and is expected to retry once the consumer has drained some data.
    pub fn write(&self, data: &[u8]) -> usize {
        self.inner.lock().write(data)
    }

    /// Take up to `max` buffered bytes. `None` when empty or `max == 0`.
    pub fn read(&self, max: usize) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        let count = max.min(inner.len());
        if count == 0 {
            return None;
        }
        Some(inner.take(count))
    }

    /// Drain everything currently buffered.
    pub fn read_all(&self) -> Option<Vec<u8>> {
        self.read(usize::MAX)
    }

    /// Replace the separator used by [`readline`](Self::readline).
    ///
    /// The search restarts from the oldest unread byte. An empty pattern
    /// selects the default `\n`.
    pub fn set_separator(&self, separator: &[u8]) {
        let separator = if separator.is_empty() {
            DEFAULT_SEPARATOR
        } else {
            separator
        };
        self.inner.lock().search = SeparatorSearch::new(separator);
    }

    /// The active separator.
    pub fn separator(&self) -> Vec<u8> {
        self.inner.lock().search.pattern.clone()
    }

    /// Extract the next separator-terminated frame.
    ///
    /// Only bytes not yet examined are scanned unless `reset_search` forces a
    /// restart from the oldest unread byte. Returns `None` while no complete
    /// frame is buffered. If the ring is full and holds no separator, its
    /// entire content is returned as [`Line::Overflow`] so the producer can
    /// make progress.
    pub fn readline(&self, reset_search: bool) -> Option<Line> {
        self.inner.lock().readline(reset_search)
    }

    /// Drop all buffered bytes and any partial separator match.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.head = 0;
        inner.tail = 0;
        inner.search.restart();
    }
}

#[derive(Debug)]
struct RingInner {
    slots: Vec<u8>,
    /// Next byte to read.
    head: usize,
    /// Next slot to write.
    tail: usize,
    search: SeparatorSearch,
}

impl RingInner {
    fn len(&self) -> usize {
        (self.tail + self.slots.len() - self.head) % self.slots.len()
    }

    fn free(&self) -> usize {
        self.slots.len() - 1 - self.len()
    }

    fn is_full(&self) -> bool {
        (self.head + self.slots.len() - self.tail) % self.slots.len() == 1
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let count = data.len().min(self.free());
        let slots = self.slots.len();
        let first = count.min(slots - self.tail);

        self.slots[self.tail..self.tail + first].copy_from_slice(&data[..first]);
        self.slots[..count - first].copy_from_slice(&data[first..count]);
        self.tail = (self.tail + count) % slots;

        count
    }

    /// Copy out and consume `count` bytes. `count` must not exceed `len()`.
    fn take(&mut self, count: usize) -> Vec<u8> {
        let slots = self.slots.len();
        let first = count.min(slots - self.head);

        let mut out = Vec::with_capacity(count);
        out.extend_from_slice(&self.slots[self.head..self.head + first]);
        out.extend_from_slice(&self.slots[..count - first]);

        self.head = (self.head + count) % slots;
        self.search.consumed(count);
        out
    }

    fn readline(&mut self, reset_search: bool) -> Option<Line> {
        if reset_search {
            self.search.restart();
        }

        let len = self.len();
        let slots = self.slots.len();

        while self.search.scanned < len {
            let byte = self.slots[(self.head + self.search.scanned) % slots];
            self.search.scanned += 1;

            if self.search.feed(byte) {
                let separator_len = self.search.pattern.len();
                let frame_len = self.search.scanned - separator_len;

                let frame = self.take(frame_len);
                self.head = (self.head + separator_len) % slots;
                self.search.restart();

                debug!("Frame extracted: {} bytes", frame.len());
                return Some(Line::Complete(frame));
            }
        }

        if self.is_full() {
            warn!("Receive buffer full without separator, draining {} bytes", len);
            return Some(Line::Overflow(self.take(len)));
        }

        None
    }
}

/// Incremental KMP matcher over the unread region of the ring.
#[derive(Debug)]
struct SeparatorSearch {
    pattern: Vec<u8>,
    /// `failure[i]`: length of the longest proper border of `pattern[..=i]`.
    failure: Vec<usize>,
    /// Bytes after `head` already fed to the matcher.
    scanned: usize,
    /// Length of the separator prefix matched so far.
    matched: usize,
}

impl SeparatorSearch {
    fn new(pattern: &[u8]) -> Self {
        Self {
            pattern: pattern.to_vec(),
            failure: failure_table(pattern),
            scanned: 0,
            matched: 0,
        }
    }

    fn restart(&mut self) {
        self.scanned = 0;
        self.matched = 0;
    }

    /// Advance the matcher by one byte; true once the whole pattern matched.
    fn feed(&mut self, byte: u8) -> bool {
        while self.matched > 0 && self.pattern[self.matched] != byte {
            self.matched = self.failure[self.matched - 1];
        }
        if self.pattern[self.matched] == byte {
            self.matched += 1;
        }
        if self.matched == self.pattern.len() {
            self.matched = self.failure[self.matched - 1];
            return true;
        }
        false
    }

    /// Keep the cursor anchored after `count` bytes left through `head`.
    fn consumed(&mut self, count: usize) {
        // The partial match is the tail of the scanned region; if any of it
        // was consumed, scanning starts over at the new head.
        if count >= self.scanned || self.scanned - count < self.matched {
            self.restart();
        } else {
            self.scanned -= count;
        }
    }
}

fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut border = 0;

    for i in 1..pattern.len() {
        while border > 0 && pattern[i] != pattern[border] {
            border = table[border - 1];
        }
        if pattern[i] == pattern[border] {
            border += 1;
        }
        table[i] = border;
    }

    table
}
