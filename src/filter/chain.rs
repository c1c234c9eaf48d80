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

//! Filter chain construction and traversal
//!
//! [`ChainFilterBuilder`] stacks filter factories with a typed `add`
//! operation whose signature carries the "previous output equals next
//! input" constraint. Per connection, [`ChainFilterBuilder::instantiate`]
//! produces a [`FilterChain`]: one filter per factory plus 2·(N−1)
//! intermediate data queues and 2·(N−1) event queues per direction,
//! pre-allocated and reused across traversals.
//!
//! Internally every stage is erased to a uniform boxed-message interface;
//! only the chain edges are typed. Inbound traversal runs front to back,
//! outbound in reverse, and the out-of-band traversals follow the same
//! topology on the paired event queues. A single-stage chain short-circuits
//! straight from edge to edge.

use crate::error::{MuxError, Result};
use crate::filter::{Filter, MessageQueue, OobEvent, OobFilter};
use crate::types::ConnectionId;
use std::any::Any;
use std::marker::PhantomData;

type BoxedMessage = Box<dyn Any + Send>;

/// The connection a filter is being built for
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// Connection ID
    pub id: ConnectionId,
    /// Connection name
    pub name: String,
}

/// Uniform erased interface every stage is adapted to
trait ChainStage: Send {
    fn inbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()>;

    fn outbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()>;

    fn inbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()>;

    fn outbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()>;
}

fn unbox_into<T: Send + 'static>(
    src: &mut MessageQueue<BoxedMessage>,
    dst: &mut MessageQueue<T>,
) -> Result<()> {
    while let Some(item) = src.pop() {
        match item.downcast::<T>() {
            Ok(value) => dst.push(*value),
            Err(_) => return Err(MuxError::FilterMismatch),
        }
    }
    Ok(())
}

fn rebox_into<T: Send + 'static>(src: &mut MessageQueue<T>, dst: &mut MessageQueue<BoxedMessage>) {
    while let Some(item) = src.pop() {
        dst.push(Box::new(item));
    }
}

fn transfer_events(src: &mut MessageQueue<OobEvent>, dst: &mut MessageQueue<OobEvent>) {
    while let Some(event) = src.pop() {
        dst.push(event);
    }
}

/// Adapter for filters that process out-of-band events themselves
struct OobStage<F: OobFilter> {
    filter: F,
    wire: MessageQueue<F::In>,
    app: MessageQueue<F::Out>,
}

impl<F: OobFilter> OobStage<F> {
    fn new(filter: F) -> Self {
        Self {
            filter,
            wire: MessageQueue::new(),
            app: MessageQueue::new(),
        }
    }
}

impl<F: OobFilter> ChainStage for OobStage<F> {
    fn inbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        unbox_into(input, &mut self.wire)?;
        self.filter.inbound(self.wire.reader(), self.app.writer())?;
        rebox_into(&mut self.app, output);
        Ok(())
    }

    fn outbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        unbox_into(input, &mut self.app)?;
        self.filter.outbound(self.app.reader(), self.wire.writer())?;
        rebox_into(&mut self.wire, output);
        Ok(())
    }

    fn inbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        unbox_into(input, &mut self.wire)?;
        self.filter.inbound_oob(
            self.wire.reader(),
            input_events.reader(),
            self.app.writer(),
            output_events.writer(),
        )?;
        rebox_into(&mut self.app, output);
        Ok(())
    }

    fn outbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        unbox_into(input, &mut self.app)?;
        self.filter.outbound_oob(
            self.app.reader(),
            input_events.reader(),
            self.wire.writer(),
            output_events.writer(),
        )?;
        rebox_into(&mut self.wire, output);
        Ok(())
    }
}

/// Adapter for plain filters: events pass through unchanged
struct PlainStage<F: Filter> {
    filter: F,
    wire: MessageQueue<F::In>,
    app: MessageQueue<F::Out>,
}

impl<F: Filter> PlainStage<F> {
    fn new(filter: F) -> Self {
        Self {
            filter,
            wire: MessageQueue::new(),
            app: MessageQueue::new(),
        }
    }
}

impl<F: Filter> ChainStage for PlainStage<F> {
    fn inbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        unbox_into(input, &mut self.wire)?;
        self.filter.inbound(self.wire.reader(), self.app.writer())?;
        rebox_into(&mut self.app, output);
        Ok(())
    }

    fn outbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        unbox_into(input, &mut self.app)?;
        self.filter.outbound(self.app.reader(), self.wire.writer())?;
        rebox_into(&mut self.wire, output);
        Ok(())
    }

    fn inbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        self.inbound(input, output)?;
        transfer_events(input_events, output_events);
        Ok(())
    }

    fn outbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        self.outbound(input, output)?;
        transfer_events(input_events, output_events);
        Ok(())
    }
}

/// Degenerate stage for an empty chain: messages and events pass untouched
struct PassthroughStage;

impl ChainStage for PassthroughStage {
    fn inbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        while let Some(item) = input.pop() {
            output.push(item);
        }
        Ok(())
    }

    fn outbound(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        output: &mut MessageQueue<BoxedMessage>,
    ) -> Result<()> {
        self.inbound(input, output)
    }

    fn inbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        self.inbound(input, output)?;
        transfer_events(input_events, output_events);
        Ok(())
    }

    fn outbound_oob(
        &mut self,
        input: &mut MessageQueue<BoxedMessage>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<BoxedMessage>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        self.inbound_oob(input, input_events, output, output_events)
    }
}

type StageFactory = Box<dyn Fn(&FilterContext) -> Box<dyn ChainStage> + Send + Sync>;

/// Typed builder for a stack of filters
///
/// `I` is the wire-side type of the whole stack and `O` its current
/// application-side type; each `add` advances `O` to the added filter's
/// output type, so mismatched stackings do not compile.
///
/// # Example
///
/// ```
/// use muxio::{ChainFilterBuilder, FrameFilter, Utf8Filter};
/// use bytes::Bytes;
///
/// let chain = ChainFilterBuilder::<Bytes, Bytes>::new()
///     .add(|_| FrameFilter::new(64, 4096))
///     .add(|_| Utf8Filter);
/// ```
pub struct ChainFilterBuilder<I, O> {
    factories: Vec<StageFactory>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Send + 'static> ChainFilterBuilder<I, I> {
    /// Start an empty stack; until a filter is added it passes `I` through
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            _types: PhantomData,
        }
    }
}

impl<I: Send + 'static> Default for ChainFilterBuilder<I, I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Send + 'static, O: Send + 'static> ChainFilterBuilder<I, O> {
    /// Append a plain filter; out-of-band events pass through it unchanged
    pub fn add<F, B>(mut self, build: B) -> ChainFilterBuilder<I, F::Out>
    where
        F: Filter<In = O> + 'static,
        B: Fn(&FilterContext) -> F + Send + Sync + 'static,
    {
        self.factories
            .push(Box::new(move |ctx| Box::new(PlainStage::new(build(ctx)))));
        ChainFilterBuilder {
            factories: self.factories,
            _types: PhantomData,
        }
    }

    /// Append a filter with its own out-of-band event processing
    pub fn add_oob<F, B>(mut self, build: B) -> ChainFilterBuilder<I, F::Out>
    where
        F: OobFilter<In = O> + 'static,
        B: Fn(&FilterContext) -> F + Send + Sync + 'static,
    {
        self.factories
            .push(Box::new(move |ctx| Box::new(OobStage::new(build(ctx)))));
        ChainFilterBuilder {
            factories: self.factories,
            _types: PhantomData,
        }
    }

    /// Build the per-connection chain
    pub(crate) fn instantiate(&self, ctx: &FilterContext) -> FilterChain<I, O> {
        let mut stages: Vec<Box<dyn ChainStage>> =
            self.factories.iter().map(|build| build(ctx)).collect();
        if stages.is_empty() {
            stages.push(Box::new(PassthroughStage));
        }

        let n = stages.len();
        FilterChain {
            stages,
            forward_data: (1..n).map(|_| MessageQueue::new()).collect(),
            backward_data: (1..n).map(|_| MessageQueue::new()).collect(),
            forward_events: (1..n).map(|_| MessageQueue::new()).collect(),
            backward_events: (1..n).map(|_| MessageQueue::new()).collect(),
            ingress: MessageQueue::new(),
            egress: MessageQueue::new(),
            _types: PhantomData,
        }
    }
}

/// A built per-connection filter pipeline
pub(crate) struct FilterChain<I, O> {
    stages: Vec<Box<dyn ChainStage>>,
    /// Intermediate data queues, inbound direction; queue `i` joins stage
    /// `i` to stage `i + 1`
    forward_data: Vec<MessageQueue<BoxedMessage>>,
    /// Intermediate data queues, outbound direction; queue `i` is written
    /// by stage `i + 1` and read by stage `i`
    backward_data: Vec<MessageQueue<BoxedMessage>>,
    forward_events: Vec<MessageQueue<OobEvent>>,
    backward_events: Vec<MessageQueue<OobEvent>>,
    ingress: MessageQueue<BoxedMessage>,
    egress: MessageQueue<BoxedMessage>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I: Send + 'static, O: Send + 'static> FilterChain<I, O> {
    fn box_edge<T: Send + 'static>(edge: &mut MessageQueue<T>, into: &mut MessageQueue<BoxedMessage>) {
        while let Some(item) = edge.pop() {
            into.push(Box::new(item));
        }
    }

    /// Run wire-side messages forward through every stage
    pub(crate) fn inbound(
        &mut self,
        input: &mut MessageQueue<I>,
        output: &mut MessageQueue<O>,
    ) -> Result<()> {
        Self::box_edge(input, &mut self.ingress);
        let n = self.stages.len();

        if n == 1 {
            self.stages[0].inbound(&mut self.ingress, &mut self.egress)?;
        } else {
            self.stages[0].inbound(&mut self.ingress, &mut self.forward_data[0])?;
            for i in 1..n - 1 {
                let (left, right) = self.forward_data.split_at_mut(i);
                self.stages[i].inbound(&mut left[i - 1], &mut right[0])?;
            }
            self.stages[n - 1].inbound(&mut self.forward_data[n - 2], &mut self.egress)?;
        }

        unbox_into(&mut self.egress, output)
    }

    /// Run application-side messages backward through every stage
    pub(crate) fn outbound(
        &mut self,
        input: &mut MessageQueue<O>,
        output: &mut MessageQueue<I>,
    ) -> Result<()> {
        Self::box_edge(input, &mut self.ingress);
        let n = self.stages.len();

        if n == 1 {
            self.stages[0].outbound(&mut self.ingress, &mut self.egress)?;
        } else {
            self.stages[n - 1].outbound(&mut self.ingress, &mut self.backward_data[n - 2])?;
            for i in (1..n - 1).rev() {
                let (left, right) = self.backward_data.split_at_mut(i);
                self.stages[i].outbound(&mut right[0], &mut left[i - 1])?;
            }
            self.stages[0].outbound(&mut self.backward_data[0], &mut self.egress)?;
        }

        unbox_into(&mut self.egress, output)
    }

    /// Inbound traversal with paired out-of-band event queues
    pub(crate) fn inbound_oob(
        &mut self,
        input: &mut MessageQueue<I>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<O>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        Self::box_edge(input, &mut self.ingress);
        let n = self.stages.len();

        if n == 1 {
            self.stages[0].inbound_oob(&mut self.ingress, input_events, &mut self.egress, output_events)?;
        } else {
            self.stages[0].inbound_oob(
                &mut self.ingress,
                input_events,
                &mut self.forward_data[0],
                &mut self.forward_events[0],
            )?;
            for i in 1..n - 1 {
                let (data_left, data_right) = self.forward_data.split_at_mut(i);
                let (evts_left, evts_right) = self.forward_events.split_at_mut(i);
                self.stages[i].inbound_oob(
                    &mut data_left[i - 1],
                    &mut evts_left[i - 1],
                    &mut data_right[0],
                    &mut evts_right[0],
                )?;
            }
            self.stages[n - 1].inbound_oob(
                &mut self.forward_data[n - 2],
                &mut self.forward_events[n - 2],
                &mut self.egress,
                output_events,
            )?;
        }

        unbox_into(&mut self.egress, output)
    }

    /// Outbound traversal with paired out-of-band event queues
    pub(crate) fn outbound_oob(
        &mut self,
        input: &mut MessageQueue<O>,
        input_events: &mut MessageQueue<OobEvent>,
        output: &mut MessageQueue<I>,
        output_events: &mut MessageQueue<OobEvent>,
    ) -> Result<()> {
        Self::box_edge(input, &mut self.ingress);
        let n = self.stages.len();

        if n == 1 {
            self.stages[0].outbound_oob(&mut self.ingress, input_events, &mut self.egress, output_events)?;
        } else {
            self.stages[n - 1].outbound_oob(
                &mut self.ingress,
                input_events,
                &mut self.backward_data[n - 2],
                &mut self.backward_events[n - 2],
            )?;
            for i in (1..n - 1).rev() {
                let (data_left, data_right) = self.backward_data.split_at_mut(i);
                let (evts_left, evts_right) = self.backward_events.split_at_mut(i);
                self.stages[i].outbound_oob(
                    &mut data_right[0],
                    &mut evts_right[0],
                    &mut data_left[i - 1],
                    &mut evts_left[i - 1],
                )?;
            }
            self.stages[0].outbound_oob(
                &mut self.backward_data[0],
                &mut self.backward_events[0],
                &mut self.egress,
                output_events,
            )?;
        }

        unbox_into(&mut self.egress, output)
    }
}
