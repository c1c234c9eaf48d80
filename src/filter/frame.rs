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

//! Length-prefixed framing filter
//!
//! Outbound messages are prefixed with a big-endian `u32` length; inbound
//! bytes are reassembled into whole frames across arbitrary chunk
//! boundaries. A frame longer than the configured maximum is a framing
//! error in either direction.

use crate::error::{MuxError, Result};
use crate::filter::{Filter, QueueReader, QueueWriter};
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};

const HEADER_LEN: usize = 4;

/// Frames opaque byte payloads with a length prefix
#[derive(Debug)]
pub struct FrameFilter {
    maximum: usize,
    accumulator: BytesMut,
    pending: Option<usize>,
}

impl FrameFilter {
    /// Create a framing filter
    ///
    /// `minimum` sizes the reassembly buffer; `maximum` bounds admissible
    /// frame payloads.
    pub fn new(minimum: usize, maximum: usize) -> Self {
        Self {
            maximum,
            accumulator: BytesMut::with_capacity(minimum),
            pending: None,
        }
    }

    fn decode_header(&mut self) -> Result<Option<usize>> {
        if self.accumulator.len() < HEADER_LEN {
            return Ok(None);
        }
        let header = self.accumulator.split_to(HEADER_LEN);
        let length = (&header[..]).read_u32::<BigEndian>()? as usize;
        if length > self.maximum {
            return Err(MuxError::FrameTooLarge {
                size: length,
                max: self.maximum,
            });
        }
        Ok(Some(length))
    }
}

impl Filter for FrameFilter {
    type In = Bytes;
    type Out = Bytes;

    fn inbound(
        &mut self,
        mut input: QueueReader<'_, Bytes>,
        mut output: QueueWriter<'_, Bytes>,
    ) -> Result<()> {
        while let Some(chunk) = input.pop() {
            self.accumulator.extend_from_slice(&chunk);
        }

        loop {
            let length = match self.pending.take() {
                Some(length) => length,
                None => match self.decode_header()? {
                    Some(length) => length,
                    None => return Ok(()),
                },
            };

            if self.accumulator.len() < length {
                self.pending = Some(length);
                return Ok(());
            }

            output.push(self.accumulator.split_to(length).freeze());
        }
    }

    fn outbound(
        &mut self,
        mut input: QueueReader<'_, Bytes>,
        mut output: QueueWriter<'_, Bytes>,
    ) -> Result<()> {
        while let Some(payload) = input.pop() {
            if payload.len() > self.maximum {
                return Err(MuxError::FrameTooLarge {
                    size: payload.len(),
                    max: self.maximum,
                });
            }
            let mut frame = BytesMut::with_capacity(HEADER_LEN + payload.len());
            frame.put_u32(payload.len() as u32);
            frame.extend_from_slice(&payload);
            output.push(frame.freeze());
        }
        Ok(())
    }
}
