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

//! Filter pipeline building blocks
//!
//! A [`Filter`] is a pure transform between two typed message queues, one
//! per direction: `inbound` turns wire-side messages into application-side
//! messages, `outbound` does the reverse. An [`OobFilter`] additionally
//! transforms paired control-event queues so signals such as bind and
//! closing traverse the pipeline in band with data.
//!
//! Filters see their queues only through [`QueueReader`] and [`QueueWriter`]
//! views: a reader cannot be pushed to, a writer cannot be popped from, and
//! the borrow lifetimes prevent a filter from retaining a queue across
//! calls. Each queue is single-producer single-consumer within one
//! traversal.
//!
//! Concrete filters are stacked with [`ChainFilterBuilder`] and built once
//! per connection.

mod chain;
mod frame;
mod utf8;

pub use chain::{ChainFilterBuilder, FilterContext};
pub(crate) use chain::FilterChain;
pub use frame::FrameFilter;
pub use utf8::Utf8Filter;

use crate::error::Result;
use crate::types::ClosingCause;
use std::collections::VecDeque;

/// An in-band control signal propagated through the filter pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobEvent {
    /// The pipeline has been constructed and attached to a live channel
    Bind,
    /// The connection is closing for the given cause
    Closing(ClosingCause),
    /// The deferred-write reservoir crossed its high-water mark (`false`)
    /// or drained back below it (`true`)
    WritableChange(bool),
}

/// An ordered message queue traversed by the filter pipeline
#[derive(Debug)]
pub struct MessageQueue<T> {
    items: VecDeque<T>,
}

impl<T> MessageQueue<T> {
    /// Create an empty queue
    pub fn new() -> Self {
        Self { items: VecDeque::new() }
    }

    /// Append a message
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove the oldest message
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consuming read-only view
    pub fn reader(&mut self) -> QueueReader<'_, T> {
        QueueReader { items: &mut self.items }
    }

    /// Append-only view
    pub fn writer(&mut self) -> QueueWriter<'_, T> {
        QueueWriter { items: &mut self.items }
    }
}

impl<T> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Extend<T> for MessageQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}

/// Read-only, consuming view of a [`MessageQueue`]
pub struct QueueReader<'a, T> {
    items: &'a mut VecDeque<T>,
}

impl<T> QueueReader<'_, T> {
    /// Remove the oldest message
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Number of remaining messages
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check whether the view is exhausted
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Append-only view of a [`MessageQueue`]
pub struct QueueWriter<'a, T> {
    items: &'a mut VecDeque<T>,
}

impl<T> QueueWriter<'_, T> {
    /// Append a message
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }
}

/// A bidirectional transform between two typed message streams
pub trait Filter: Send {
    /// Wire-side message type
    type In: Send + 'static;
    /// Application-side message type
    type Out: Send + 'static;

    /// Transform wire-side messages into application-side messages
    fn inbound(
        &mut self,
        input: QueueReader<'_, Self::In>,
        output: QueueWriter<'_, Self::Out>,
    ) -> Result<()>;

    /// Transform application-side messages into wire-side messages
    fn outbound(
        &mut self,
        input: QueueReader<'_, Self::Out>,
        output: QueueWriter<'_, Self::In>,
    ) -> Result<()>;
}

/// A [`Filter`] that additionally processes [`OobEvent`]s
///
/// Plain filters stacked with [`ChainFilterBuilder::add`] are adapted to
/// this interface automatically, passing events through unchanged; filters
/// that must react to control signals (handshakes, flush-on-close)
/// implement it directly and are stacked with
/// [`ChainFilterBuilder::add_oob`].
pub trait OobFilter: Filter {
    /// Process events as they apply to inbound traffic
    fn inbound_oob(
        &mut self,
        input: QueueReader<'_, Self::In>,
        input_events: QueueReader<'_, OobEvent>,
        output: QueueWriter<'_, Self::Out>,
        output_events: QueueWriter<'_, OobEvent>,
    ) -> Result<()>;

    /// Process events as they apply to outbound traffic
    fn outbound_oob(
        &mut self,
        input: QueueReader<'_, Self::Out>,
        input_events: QueueReader<'_, OobEvent>,
        output: QueueWriter<'_, Self::In>,
        output_events: QueueWriter<'_, OobEvent>,
    ) -> Result<()>;
}
