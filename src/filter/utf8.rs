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

//! UTF-8 string filter
//!
//! Decodes each inbound byte message as one UTF-8 string and encodes each
//! outbound string as its byte image. Message boundaries are taken as
//! given, so this filter is normally stacked application-side of
//! [`FrameFilter`](crate::FrameFilter), which guarantees whole messages.

use crate::error::Result;
use crate::filter::{Filter, QueueReader, QueueWriter};
use bytes::Bytes;

/// String codec over framed byte messages
#[derive(Debug, Default)]
pub struct Utf8Filter;

impl Filter for Utf8Filter {
    type In = Bytes;
    type Out = String;

    fn inbound(
        &mut self,
        mut input: QueueReader<'_, Bytes>,
        mut output: QueueWriter<'_, String>,
    ) -> Result<()> {
        while let Some(chunk) = input.pop() {
            output.push(String::from_utf8(chunk.to_vec())?);
        }
        Ok(())
    }

    fn outbound(
        &mut self,
        mut input: QueueReader<'_, String>,
        mut output: QueueWriter<'_, Bytes>,
    ) -> Result<()> {
        while let Some(s) = input.pop() {
            output.push(Bytes::from(s.into_bytes()));
        }
        Ok(())
    }
}
