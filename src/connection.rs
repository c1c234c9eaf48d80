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

//! Managed connections
//!
//! A connection is split in two. The *record* ([`ConnectionCore`], seen by
//! the engine as a boxed [`Conduit`]) owns the socket, buffers, filter
//! chain, and handler; it lives on exactly one selector thread at a time
//! and moves between threads by value inside a `Dispatch` event. The
//! *proxy* ([`ManagedConnection`]) is the cloneable application-side
//! handle; every operation on it routes through the current owner thread's
//! inbox, so the record itself is never touched by a foreign thread.
//!
//! Outbound messages are staged on the proxy and flushed through the
//! outbound filter chain by the owner thread, which keeps submission order
//! and lets callers write before initialization completes.

use crate::error::{MuxError, Result};
use crate::event::{EventPayload, InterestEvent, InterestKind, OpChange};
use crate::filter::{ChainFilterBuilder, FilterChain, FilterContext, MessageQueue, OobEvent};
use crate::future::{Promise, RequestFuture};
use crate::handler::ConnectionHandler;
use crate::buffer::{ReadBuffer, WriteReservoir};
use crate::types::{ClosingCause, ConnectionId, ConnectionInfo, ConnectionStatus};
use bytes::Bytes;
use crossbeam_channel::Sender;
use mio::net::TcpStream;
use mio::{Token, Waker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Route to a connection's current owner thread
pub(crate) struct Router {
    /// Owning thread's tag, used to detect self-forwarding
    pub tag: usize,
    /// Owning thread's inbox
    pub tx: Sender<InterestEvent>,
    /// Owning thread's selector waker
    pub waker: Arc<Waker>,
}

impl Router {
    pub(crate) fn duplicate(&self) -> Router {
        Router {
            tag: self.tag,
            tx: self.tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }
}

/// Type-erased, thread-safe core of a connection proxy
///
/// Carried as the `source` of connection-targeted [`InterestEvent`]s; holds
/// the router, a status mirror for fail-fast checks, and the cached
/// addresses.
pub(crate) struct ProxyCore {
    id: ConnectionId,
    name: String,
    /// Packed status mirror: low nibble status, high nibble closing cause
    mirror: AtomicU8,
    router: Mutex<Router>,
    addresses: Mutex<Option<(SocketAddr, SocketAddr)>>,
}

impl ProxyCore {
    fn new(id: ConnectionId, name: String, router: Router) -> Self {
        Self {
            id,
            name,
            mirror: AtomicU8::new(ConnectionStatus::Virgin.as_u8()),
            router: Mutex::new(router),
            addresses: Mutex::new(None),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.mirror.load(Ordering::Acquire) & 0x0f)
    }

    pub(crate) fn closing_cause(&self) -> Option<ClosingCause> {
        ClosingCause::from_u8(self.mirror.load(Ordering::Acquire) >> 4)
    }

    fn set_mirror(&self, status: ConnectionStatus, cause: Option<ClosingCause>) {
        let packed = status.as_u8() | (cause.map(ClosingCause::as_u8).unwrap_or(0) << 4);
        self.mirror.store(packed, Ordering::Release);
    }

    fn set_addresses(&self, local: SocketAddr, peer: SocketAddr) {
        *self.addresses.lock() = Some((local, peer));
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.addresses.lock().map(|(local, _)| local)
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.addresses.lock().map(|(_, peer)| peer)
    }

    /// Deliver an event to the current owner thread and wake its selector
    pub(crate) fn submit(&self, event: InterestEvent) -> Result<()> {
        let router = self.router.lock();
        router.tx.send(event).map_err(|_| MuxError::ChannelClosed)?;
        router.waker.wake()?;
        Ok(())
    }

    /// Atomically enqueue the record at its new owner and swap the route
    ///
    /// Submissions racing the handoff serialize on the router lock: they
    /// land either ahead of the swap (and are forwarded by the old owner)
    /// or behind the enqueued record, never ahead of it.
    pub(crate) fn handoff(&self, router: Router, enqueue: impl FnOnce() -> Result<()>) -> Result<()> {
        let mut guard = self.router.lock();
        enqueue()?;
        *guard = router;
        Ok(())
    }

    /// Check whether the proxy currently routes to the given thread
    pub(crate) fn routes_to(&self, tag: usize) -> bool {
        self.router.lock().tag == tag
    }
}

impl fmt::Debug for ProxyCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [{}]", self.name, self.id.as_u64(), self.status())
    }
}

struct ConnectionShared<T> {
    core: Arc<ProxyCore>,
    /// Outbound messages staged by callers, drained by the owner thread
    staging: Mutex<VecDeque<T>>,
}

/// Outcome of a read-readiness pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadOutcome {
    /// More data may arrive
    Progress,
    /// The peer shut down its write side
    EndOfStream,
}

/// Outcome of a write-readiness pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// The reservoir is empty
    Drained,
    /// Deferred regions remain
    Pending,
}

/// Engine-side interface to an owned connection record
///
/// Everything here runs on the connection's current owner thread.
pub(crate) trait Conduit: Send {
    fn id(&self) -> ConnectionId;
    fn name(&self) -> &str;
    fn proxy(&self) -> &Arc<ProxyCore>;

    fn status(&self) -> ConnectionStatus;
    fn set_status(&mut self, status: ConnectionStatus);
    fn closing_cause(&self) -> Option<ClosingCause>;

    /// Adopt an established or connecting socket
    fn install(&mut self, stream: TcpStream);
    fn stream(&mut self) -> Option<&mut TcpStream>;
    fn has_stream(&self) -> bool;

    fn token(&self) -> Option<Token>;
    fn set_token(&mut self, token: Option<Token>);

    fn read_interest(&self) -> bool;
    fn set_read_interest(&mut self, on: bool);
    fn write_interest(&self) -> bool;
    fn set_write_interest(&mut self, on: bool);

    /// Store the completion promise of an in-flight init request
    fn set_init(&mut self, reply: Promise<SocketAddr>);

    /// Construct the filter chain, publish addresses, complete the init
    /// future, deliver `on_bind`, and flush staged outbound messages
    fn bind(&mut self) -> Result<()>;

    /// Drain staged outbound messages through the chain into the reservoir
    fn flush_staged(&mut self) -> Result<()>;

    /// Read until the socket would block, pushing batches through the chain
    fn read_ready(&mut self) -> Result<ReadOutcome>;

    /// Write deferred regions until drained or the socket would block
    fn write_ready(&mut self) -> Result<WriteOutcome>;

    /// Check whether deferred regions await writing
    fn wants_write(&self) -> bool;

    /// Enter `Closing` for the first terminal cause; later causes are absorbed
    fn begin_close(&mut self, cause: ClosingCause) -> Result<()>;

    /// Close the channel, complete callbacks, and enter `Closed`
    fn finish_close(&mut self);

    /// Capture the first error and surface it through `on_error`
    fn record_error(&mut self, error: Arc<MuxError>);

    /// Fail a pending init future, if any
    fn fail_init(&mut self, error: Arc<MuxError>);

    fn info(&self) -> ConnectionInfo;
}

/// The owned state of one managed connection
struct ConnectionCore<T> {
    shared: Arc<ConnectionShared<T>>,
    builder: Arc<ChainFilterBuilder<Bytes, T>>,
    handler: Box<dyn ConnectionHandler<T>>,

    stream: Option<TcpStream>,
    token: Option<Token>,
    read_interest: bool,
    write_interest: bool,

    status: ConnectionStatus,
    cause: Option<ClosingCause>,
    error: Option<Arc<MuxError>>,
    init: Option<Promise<SocketAddr>>,

    read_buf: ReadBuffer,
    reservoir: WriteReservoir,

    chain: Option<FilterChain<Bytes, T>>,
    wire_in: MessageQueue<Bytes>,
    app_in: MessageQueue<T>,
    app_out: MessageQueue<T>,
    wire_out: MessageQueue<Bytes>,
    oob_in: MessageQueue<OobEvent>,
    oob_out: MessageQueue<OobEvent>,
}

impl<T: Send + 'static> ConnectionCore<T> {
    /// Move chain output regions into the reservoir; true on a high-water crossing
    fn siphon_wire_out(&mut self) -> bool {
        let mut crossed = false;
        while let Some(region) = self.wire_out.pop() {
            crossed |= self.reservoir.push(region);
        }
        crossed
    }

    /// Send one control event through both OOB traversals
    fn raise_oob(&mut self, event: OobEvent) -> Result<()> {
        if let Some(chain) = self.chain.as_mut() {
            self.oob_in.push(event);
            chain.inbound_oob(
                &mut self.wire_in,
                &mut self.oob_in,
                &mut self.app_in,
                &mut self.oob_out,
            )?;
            while self.oob_out.pop().is_some() {}

            self.oob_in.push(event);
            chain.outbound_oob(
                &mut self.app_out,
                &mut self.oob_in,
                &mut self.wire_out,
                &mut self.oob_out,
            )?;
            while self.oob_out.pop().is_some() {}
        }
        self.siphon_wire_out();
        Ok(())
    }

    /// Push accumulated reads through the inbound chain to the handler
    fn pump_inbound(&mut self) -> Result<()> {
        if self.read_buf.is_empty() {
            return Ok(());
        }
        let chunk = self.read_buf.take();
        self.wire_in.push(chunk);
        if let Some(chain) = self.chain.as_mut() {
            chain.inbound(&mut self.wire_in, &mut self.app_in)?;
        }
        if !self.app_in.is_empty() {
            self.handler.on_receive(&mut self.app_in);
        }
        Ok(())
    }
}

impl<T: Send + 'static> Conduit for ConnectionCore<T> {
    fn id(&self) -> ConnectionId {
        self.shared.core.id
    }

    fn name(&self) -> &str {
        &self.shared.core.name
    }

    fn proxy(&self) -> &Arc<ProxyCore> {
        &self.shared.core
    }

    fn status(&self) -> ConnectionStatus {
        self.status
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.shared.core.set_mirror(status, self.cause);
    }

    fn closing_cause(&self) -> Option<ClosingCause> {
        self.cause
    }

    fn install(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
    }

    fn stream(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    fn token(&self) -> Option<Token> {
        self.token
    }

    fn set_token(&mut self, token: Option<Token>) {
        self.token = token;
    }

    fn read_interest(&self) -> bool {
        self.read_interest
    }

    fn set_read_interest(&mut self, on: bool) {
        self.read_interest = on;
    }

    fn write_interest(&self) -> bool {
        self.write_interest
    }

    fn set_write_interest(&mut self, on: bool) {
        self.write_interest = on;
    }

    fn set_init(&mut self, reply: Promise<SocketAddr>) {
        self.init = Some(reply);
    }

    fn bind(&mut self) -> Result<()> {
        let ctx = FilterContext {
            id: self.shared.core.id,
            name: self.shared.core.name.clone(),
        };
        self.chain = Some(self.builder.instantiate(&ctx));

        let mut peer = None;
        if let Some(stream) = &self.stream {
            if let (Ok(local), Ok(remote)) = (stream.local_addr(), stream.peer_addr()) {
                self.shared.core.set_addresses(local, remote);
                peer = Some(remote);
            }
        }

        self.raise_oob(OobEvent::Bind)?;

        self.handler.on_bind(&mut self.app_in);
        if !self.app_in.is_empty() {
            self.handler.on_receive(&mut self.app_in);
        }

        self.flush_staged()?;

        // Completed last: a caller returning from the init future sees a
        // fully bound connection, `on_bind` included.
        if let Some(reply) = self.init.take() {
            match peer {
                Some(addr) => reply.complete(addr),
                None => reply.fail(MuxError::ConnectionClosed),
            }
        }
        Ok(())
    }

    fn flush_staged(&mut self) -> Result<()> {
        if self.chain.is_none() {
            return Ok(());
        }
        {
            let mut staging = self.shared.staging.lock();
            while let Some(message) = staging.pop_front() {
                self.app_out.push(message);
            }
        }
        if self.app_out.is_empty() {
            return Ok(());
        }
        if let Some(chain) = self.chain.as_mut() {
            chain.outbound(&mut self.app_out, &mut self.wire_out)?;
        }
        if self.siphon_wire_out() {
            self.raise_oob(OobEvent::WritableChange(false))?;
        }
        Ok(())
    }

    fn read_ready(&mut self) -> Result<ReadOutcome> {
        let mut eos = false;
        loop {
            // Drain mid-pass once intake hits the growth bound; readiness is
            // edge-style, so the socket must be read until it would block.
            if self.read_buf.is_saturated() {
                self.pump_inbound()?;
            }
            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => break,
            };
            match self.read_buf.read_from(stream) {
                Ok(0) => {
                    eos = true;
                    break;
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.pump_inbound()?;
        Ok(if eos {
            ReadOutcome::EndOfStream
        } else {
            ReadOutcome::Progress
        })
    }

    fn write_ready(&mut self) -> Result<WriteOutcome> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(WriteOutcome::Drained),
        };
        let progress = self.reservoir.write_to(stream)?;
        if progress.recovered {
            self.raise_oob(OobEvent::WritableChange(true))?;
        }
        Ok(if self.reservoir.is_empty() {
            WriteOutcome::Drained
        } else {
            WriteOutcome::Pending
        })
    }

    fn wants_write(&self) -> bool {
        !self.reservoir.is_empty()
    }

    fn begin_close(&mut self, cause: ClosingCause) -> Result<()> {
        if self.status.is_terminal() {
            return Ok(());
        }
        self.cause = Some(cause);
        self.set_status(ConnectionStatus::Closing);
        self.raise_oob(OobEvent::Closing(cause))?;
        self.handler.on_closing(cause, &mut self.app_in);
        Ok(())
    }

    fn finish_close(&mut self) {
        if self.status == ConnectionStatus::Closed {
            return;
        }
        self.stream = None;
        self.token = None;
        self.set_status(ConnectionStatus::Closed);
        if let Some(reply) = self.init.take() {
            match &self.error {
                Some(error) => reply.fail(MuxError::Shared(Arc::clone(error))),
                None => reply.fail(MuxError::ConnectionClosed),
            }
        }
        self.handler.on_close();
    }

    fn record_error(&mut self, error: Arc<MuxError>) {
        if self.error.is_some() {
            return;
        }
        self.error = Some(Arc::clone(&error));
        self.handler.on_error(&error, self.read_buf.peek());
    }

    fn fail_init(&mut self, error: Arc<MuxError>) {
        if let Some(reply) = self.init.take() {
            reply.fail(MuxError::Shared(error));
        }
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.shared.core.id,
            name: self.shared.core.name.clone(),
            status: self.status,
            local_addr: self.shared.core.local_addr(),
            peer_addr: self.shared.core.peer_addr(),
        }
    }
}

/// Create a connection record and its proxy
pub(crate) fn create<T: Send + 'static>(
    name: String,
    router: Router,
    builder: ChainFilterBuilder<Bytes, T>,
    handler: Box<dyn ConnectionHandler<T>>,
    minimum_buffer: usize,
    maximum_buffer: usize,
    write_high_water: usize,
) -> (ManagedConnection<T>, Box<dyn Conduit>) {
    let id = ConnectionId::next();
    let core = Arc::new(ProxyCore::new(id, name, router));
    let shared = Arc::new(ConnectionShared {
        core,
        staging: Mutex::new(VecDeque::new()),
    });

    let record = ConnectionCore {
        shared: Arc::clone(&shared),
        builder: Arc::new(builder),
        handler,
        stream: None,
        token: None,
        read_interest: false,
        write_interest: false,
        status: ConnectionStatus::Virgin,
        cause: None,
        error: None,
        init: None,
        read_buf: ReadBuffer::new(minimum_buffer, maximum_buffer),
        reservoir: WriteReservoir::new(write_high_water),
        chain: None,
        wire_in: MessageQueue::new(),
        app_in: MessageQueue::new(),
        app_out: MessageQueue::new(),
        wire_out: MessageQueue::new(),
        oob_in: MessageQueue::new(),
        oob_out: MessageQueue::new(),
    };

    (ManagedConnection { shared }, Box::new(record))
}

/// Application-side handle to a managed connection
///
/// Cloneable and thread-safe; every operation routes through the
/// connection's current owner thread, even across a dispatch handoff.
pub struct ManagedConnection<T> {
    shared: Arc<ConnectionShared<T>>,
}

impl<T> Clone for ManagedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + 'static> ManagedConnection<T> {
    /// Connection ID
    pub fn id(&self) -> ConnectionId {
        self.shared.core.id
    }

    /// Connection name
    pub fn name(&self) -> &str {
        &self.shared.core.name
    }

    /// Status at the time of the call
    pub fn status(&self) -> ConnectionStatus {
        self.shared.core.status()
    }

    /// Closing cause, once one has been observed
    pub fn closing_cause(&self) -> Option<ClosingCause> {
        self.shared.core.closing_cause()
    }

    /// Local address, once the connection is bound
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.core.local_addr()
    }

    /// Peer address, once the connection is bound
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.core.peer_addr()
    }

    pub(crate) fn core_handle(&self) -> Arc<ProxyCore> {
        Arc::clone(&self.shared.core)
    }

    fn submit_event(&self, kind: InterestKind, payload: EventPayload) -> Result<()> {
        self.shared
            .core
            .submit(InterestEvent::targeting(kind, payload, Arc::clone(&self.shared.core)))
    }

    /// Initialize by connecting to `addr`
    ///
    /// The returned future completes with the peer address once the
    /// connection is active; a second initialization of any kind is a
    /// protocol violation that errors the connection.
    pub fn connect(&self, addr: SocketAddr) -> RequestFuture<SocketAddr> {
        let (reply, future) = Promise::pair();
        let _ = self.submit_event(InterestKind::Connect, EventPayload::Connect { addr, reply });
        future
    }

    /// Initialize by listening at `addr` for one inbound peer
    pub fn accept(&self, addr: SocketAddr) -> RequestFuture<SocketAddr> {
        let (reply, future) = Promise::pair();
        let _ = self.submit_event(InterestKind::Accept, EventPayload::Accept { addr, reply });
        future
    }

    /// Initialize by adopting an already-established stream
    pub fn register(&self, stream: std::net::TcpStream) -> RequestFuture<SocketAddr> {
        let (reply, future) = Promise::pair();
        match stream.set_nonblocking(true) {
            Ok(()) => {
                let stream = TcpStream::from_std(stream);
                let _ = self.submit_event(InterestKind::Register, EventPayload::Register { stream, reply });
            }
            Err(e) => reply.fail(e.into()),
        }
        future
    }

    /// Queue a message for ordered delivery to the peer
    ///
    /// Messages staged before initialization completes are flushed, in
    /// submission order, once the connection binds. Fails fast when the
    /// connection is closed or closing for any cause other than a user
    /// close.
    pub fn send(&self, message: T) -> Result<()> {
        let status = self.shared.core.status();
        match status {
            ConnectionStatus::Closed => return Err(MuxError::ConnectionClosed),
            ConnectionStatus::Closing => {
                if self.shared.core.closing_cause() != Some(ClosingCause::User) {
                    return Err(MuxError::ConnectionClosed);
                }
            }
            _ => {}
        }

        let was_empty = {
            let mut staging = self.shared.staging.lock();
            let was_empty = staging.is_empty();
            staging.push_back(message);
            was_empty
        };

        // The owner flushes staged messages on bind and on adoption. The
        // status is re-read after the push: the staging lock orders this
        // read against those flushes, so a message staged after them
        // observes `Active` and submits its own write-interest nudge.
        let status = self.shared.core.status();
        if was_empty && matches!(status, ConnectionStatus::Active | ConnectionStatus::Closing) {
            self.submit_event(
                InterestKind::Op,
                EventPayload::Op(OpChange {
                    read: None,
                    write: Some(true),
                }),
            )?;
        }
        Ok(())
    }

    /// Request a graceful close; deferred writes drain before the channel
    /// closes. Idempotent.
    pub fn close(&self) {
        let _ = self.submit_event(InterestKind::Close, EventPayload::None);
    }

    /// Terminate the connection with an error, bypassing the write drain
    pub fn error(&self, error: MuxError) {
        let _ = self.submit_event(InterestKind::Error, EventPayload::Error(Arc::new(error)));
    }

    /// Run a closure on the connection's owner thread
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) -> Result<()> {
        self.submit_event(InterestKind::Execute, EventPayload::Execute(Box::new(f)))
    }

    /// Toggle read interest on the owner's selector
    ///
    /// Disabling reads is the coarse inbound throttle: the socket's receive
    /// buffer fills and the peer blocks. Reads never resume after an
    /// end-of-stream.
    pub fn set_read_enabled(&self, enabled: bool) -> Result<()> {
        self.submit_event(
            InterestKind::Op,
            EventPayload::Op(OpChange {
                read: Some(enabled),
                write: None,
            }),
        )
    }

    /// Toggle write interest on the owner's selector
    ///
    /// Write interest is normally gated on the deferred-write reservoir;
    /// this override is for filters and tests that manage it directly.
    pub fn set_write_enabled(&self, enabled: bool) -> Result<()> {
        self.submit_event(
            InterestKind::Op,
            EventPayload::Op(OpChange {
                read: None,
                write: Some(enabled),
            }),
        )
    }
}

impl<T> fmt::Debug for ManagedConnection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} [{}]",
            self.shared.core.name,
            self.shared.core.id.as_u64(),
            self.shared.core.status()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ConnectionHandler;
    use crossbeam_channel::unbounded;
    use mio::Poll;

    struct NullHandler;

    impl ConnectionHandler<String> for NullHandler {
        fn on_receive(&mut self, inbound: &mut MessageQueue<String>) {
            while inbound.pop().is_some() {}
        }
    }

    fn proxy_fixture() -> (ManagedConnection<String>, Box<dyn Conduit>, crossbeam_channel::Receiver<InterestEvent>) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let (tx, rx) = unbounded();
        let router = Router { tag: 0, tx, waker };
        let (proxy, record) = create(
            "test".to_string(),
            router,
            ChainFilterBuilder::<Bytes, Bytes>::new().add(|_| crate::filter::Utf8Filter),
            Box::new(NullHandler),
            64,
            1024,
            1 << 16,
        );
        (proxy, record, rx)
    }

    #[test]
    fn test_mirror_packing() {
        let (proxy, mut record, _rx) = proxy_fixture();
        assert_eq!(proxy.status(), ConnectionStatus::Virgin);
        assert_eq!(proxy.closing_cause(), None);

        record.begin_close(ClosingCause::EndOfStream).unwrap();
        assert_eq!(proxy.status(), ConnectionStatus::Closing);
        assert_eq!(proxy.closing_cause(), Some(ClosingCause::EndOfStream));

        record.finish_close();
        assert_eq!(proxy.status(), ConnectionStatus::Closed);
        assert_eq!(proxy.closing_cause(), Some(ClosingCause::EndOfStream));
    }

    #[test]
    fn test_first_cause_wins() {
        let (proxy, mut record, _rx) = proxy_fixture();
        record.begin_close(ClosingCause::User).unwrap();
        record.begin_close(ClosingCause::Error).unwrap();
        assert_eq!(proxy.closing_cause(), Some(ClosingCause::User));
    }

    #[test]
    fn test_send_stages_before_init() {
        let (proxy, _record, rx) = proxy_fixture();
        proxy.send("early".to_string()).unwrap();
        proxy.send("bird".to_string()).unwrap();

        // Virgin connections stage silently; no Op event is submitted.
        assert!(rx.try_recv().is_err());
        assert_eq!(proxy.shared.staging.lock().len(), 2);
    }

    #[test]
    fn test_send_fails_fast_after_error_close() {
        let (proxy, mut record, _rx) = proxy_fixture();
        record.begin_close(ClosingCause::Error).unwrap();
        assert!(matches!(
            proxy.send("too late".to_string()),
            Err(MuxError::ConnectionClosed)
        ));

        record.finish_close();
        assert!(matches!(
            proxy.send("way too late".to_string()),
            Err(MuxError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_error_slot_single_capture() {
        let (_proxy, mut record, _rx) = proxy_fixture();
        record.record_error(Arc::new(MuxError::WildcardPort));
        record.record_error(Arc::new(MuxError::ConnectionClosed));
        // First capture wins; reflected in the info snapshot status only
        // after a close, so probe via begin_close's cause instead.
        record.begin_close(ClosingCause::Error).unwrap();
        assert_eq!(record.closing_cause(), Some(ClosingCause::Error));
    }

    #[test]
    fn test_close_routes_event() {
        let (proxy, _record, rx) = proxy_fixture();
        proxy.close();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, InterestKind::Close);
        assert!(event.source.is_some());
    }
}
