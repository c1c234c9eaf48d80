//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Per-connection byte buffers
//!
//! [`ReadBuffer`] accumulates socket reads and is drained into the filter
//! chain every readiness pass; its capacity starts at the configured minimum
//! and doubles up to the maximum, so the cap bounds per-pass intake rather
//! than total throughput. [`WriteReservoir`] holds deferred outbound regions
//! in submission order, tracks partial writes in place, and reports
//! high-water crossings in both directions for backpressure signalling.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Read, Write};

/// Growable read buffer with doubling policy
#[derive(Debug)]
pub(crate) struct ReadBuffer {
    buf: BytesMut,
    capacity: usize,
    maximum: usize,
}

impl ReadBuffer {
    pub(crate) fn new(minimum: usize, maximum: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(minimum),
            capacity: minimum,
            maximum,
        }
    }

    /// Perform one read into the spare region, growing first if full
    ///
    /// Returns the number of bytes read; zero means end-of-stream. The
    /// buffer must be drained with [`take`](Self::take) once it reaches the
    /// maximum capacity.
    pub(crate) fn read_from(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        if self.buf.len() == self.capacity && self.capacity < self.maximum {
            self.capacity = (self.capacity * 2).min(self.maximum);
        }

        let start = self.buf.len();
        debug_assert!(start < self.capacity, "read buffer must be drained when full");
        self.buf.resize(self.capacity, 0);

        match reader.read(&mut self.buf[start..]) {
            Ok(n) => {
                self.buf.truncate(start + n);
                Ok(n)
            }
            Err(e) => {
                self.buf.truncate(start);
                Err(e)
            }
        }
    }

    /// Take everything accumulated so far
    pub(crate) fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Borrow the accumulated bytes without draining
    pub(crate) fn peek(&self) -> &[u8] {
        &self.buf
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Check whether intake has hit the growth bound for this pass
    pub(crate) fn is_saturated(&self) -> bool {
        self.buf.len() >= self.maximum
    }

    #[cfg(test)]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of one [`WriteReservoir::write_to`] pass
#[derive(Debug, Clone, Copy)]
pub(crate) struct WriteProgress {
    /// Bytes written during the pass
    pub wrote: usize,
    /// The reservoir is now empty
    pub drained: bool,
    /// The reservoir dropped back below the high-water mark this pass
    pub recovered: bool,
}

/// Deferred-write queue: ordered byte regions with a high-water mark
#[derive(Debug)]
pub(crate) struct WriteReservoir {
    regions: VecDeque<Bytes>,
    total: usize,
    high_water: usize,
}

impl WriteReservoir {
    pub(crate) fn new(high_water: usize) -> Self {
        Self {
            regions: VecDeque::new(),
            total: 0,
            high_water,
        }
    }

    /// Append a region; returns true when this push crossed the high-water mark
    pub(crate) fn push(&mut self, region: Bytes) -> bool {
        let was_below = self.total < self.high_water;
        self.total += region.len();
        self.regions.push_back(region);
        was_below && self.total >= self.high_water
    }

    /// Write as much as the socket accepts, advancing partial regions in place
    ///
    /// `WouldBlock` ends the pass without error; other I/O errors propagate.
    pub(crate) fn write_to(&mut self, writer: &mut impl Write) -> io::Result<WriteProgress> {
        let was_above = self.total >= self.high_water;
        let mut wrote = 0;

        while let Some(region) = self.regions.front_mut() {
            if region.is_empty() {
                self.regions.pop_front();
                continue;
            }
            match writer.write(region) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted zero bytes",
                    ));
                }
                Ok(n) => {
                    let _ = region.split_to(n);
                    self.total -= n;
                    wrote += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        while matches!(self.regions.front(), Some(region) if region.is_empty()) {
            self.regions.pop_front();
        }

        Ok(WriteProgress {
            wrote,
            drained: self.regions.is_empty(),
            recovered: was_above && self.total < self.high_water,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A writer that accepts a fixed number of bytes, then `WouldBlock`s
    struct Throttled {
        accepted: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "full"));
            }
            let n = buf.len().min(self.budget);
            self.accepted.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_read_buffer_doubles_to_maximum() {
        let mut rb = ReadBuffer::new(4, 16);
        assert_eq!(rb.capacity(), 4);

        let mut source: &[u8] = &[7u8; 64];
        assert_eq!(rb.read_from(&mut source).unwrap(), 4);
        assert_eq!(rb.read_from(&mut source).unwrap(), 4);
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.read_from(&mut source).unwrap(), 8);
        assert_eq!(rb.capacity(), 16);
        assert!(rb.is_saturated());

        let taken = rb.take();
        assert_eq!(taken.len(), 16);
        assert!(taken.iter().all(|&b| b == 7));
        assert!(rb.is_empty());

        // Capacity stays at the bound after draining.
        assert_eq!(rb.read_from(&mut source).unwrap(), 16);
        assert_eq!(rb.capacity(), 16);
    }

    #[test]
    fn test_read_buffer_reports_eos() {
        let mut rb = ReadBuffer::new(4, 16);
        let mut source: &[u8] = &[];
        assert_eq!(rb.read_from(&mut source).unwrap(), 0);
    }

    #[test]
    fn test_reservoir_ordering_and_partial_writes() {
        let mut reservoir = WriteReservoir::new(1024);
        reservoir.push(Bytes::from_static(b"hello "));
        reservoir.push(Bytes::from_static(b"world"));

        let mut sink = Throttled { accepted: Vec::new(), budget: 8 };
        let progress = reservoir.write_to(&mut sink).unwrap();
        assert_eq!(progress.wrote, 8);
        assert!(!progress.drained);
        assert_eq!(sink.accepted, b"hello wo");

        sink.budget = 16;
        let progress = reservoir.write_to(&mut sink).unwrap();
        assert_eq!(progress.wrote, 3);
        assert!(progress.drained);
        assert_eq!(sink.accepted, b"hello world");
        assert!(reservoir.is_empty());
    }

    #[test]
    fn test_reservoir_high_water_crossings() {
        let mut reservoir = WriteReservoir::new(8);
        assert!(!reservoir.push(Bytes::from_static(b"abcd")));
        assert!(reservoir.push(Bytes::from_static(b"efgh")));
        // Already above the mark: no second crossing.
        assert!(!reservoir.push(Bytes::from_static(b"ijkl")));
        assert_eq!(reservoir.pending_bytes(), 12);

        let mut sink = Throttled { accepted: Vec::new(), budget: 6 };
        let progress = reservoir.write_to(&mut sink).unwrap();
        assert!(progress.recovered);
        assert!(!progress.drained);

        let mut sink = Throttled { accepted: Vec::new(), budget: 64 };
        let progress = reservoir.write_to(&mut sink).unwrap();
        assert!(!progress.recovered);
        assert!(progress.drained);
    }

    #[test]
    fn test_reservoir_accepts_empty_region() {
        let mut reservoir = WriteReservoir::new(8);
        reservoir.push(Bytes::new());
        reservoir.push(Bytes::from_static(b"x"));

        let mut sink = Throttled { accepted: Vec::new(), budget: 4 };
        let progress = reservoir.write_to(&mut sink).unwrap();
        assert_eq!(progress.wrote, 1);
        assert!(progress.drained);
    }
}
