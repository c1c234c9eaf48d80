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

//! Selector thread base
//!
//! Both engine thread types run the same cooperative loop over a
//! [`SelectorCore`]: drain the inbox and dispatch each event through the
//! thread's state table, block on the selector until readiness or a wakeup,
//! then handle ready tokens. Faults are isolated per event and per key
//! through [`SelectorCore::fail_connection`]; the loop itself never dies
//! from a connection-level fault.

use crate::connection::{Conduit, Router};
use crate::error::{MuxError, Result};
use crate::event::{EventPayload, InterestEvent, InterestKind};
use crate::future::{Promise, RequestFuture};
use crate::types::{ClosingCause, ConnectionId, ConnectionInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::{Interest, Poll, Token, Waker};
use slab::Slab;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What a selector token is registered for
#[derive(Debug, Clone, Copy)]
pub(crate) enum TokenSlot {
    /// The thread's waker
    Waker,
    /// A connection's stream
    Connection(ConnectionId),
    /// A listening socket in the accept registry
    Listener(SocketAddr),
}

/// Selector, inbox, and connection bookkeeping shared by both thread types
pub(crate) struct SelectorCore {
    pub name: String,
    /// Identifies this thread in proxy routers
    pub tag: usize,
    pub poll: Poll,
    pub waker: Arc<Waker>,
    pub inbox_tx: Sender<InterestEvent>,
    pub inbox_rx: Receiver<InterestEvent>,
    pub tokens: Slab<TokenSlot>,
    pub conns: HashMap<ConnectionId, Box<dyn Conduit>>,
    pub select_timeout: Duration,
    pub running: bool,
    /// Cause to signal to surviving connections when the loop exits
    pub shutdown_cause: Option<Arc<MuxError>>,
}

impl SelectorCore {
    pub(crate) fn new(name: String, tag: usize, select_timeout: Duration) -> Result<Self> {
        let poll = Poll::new()?;
        let mut tokens = Slab::new();
        let waker_token = Token(tokens.insert(TokenSlot::Waker));
        let waker = Arc::new(Waker::new(poll.registry(), waker_token)?);
        let (inbox_tx, inbox_rx) = unbounded();

        Ok(Self {
            name,
            tag,
            poll,
            waker,
            inbox_tx,
            inbox_rx,
            tokens,
            conns: HashMap::new(),
            select_timeout,
            running: true,
            shutdown_cause: None,
        })
    }

    /// Route external submissions to this thread
    pub(crate) fn router(&self) -> Router {
        Router {
            tag: self.tag,
            tx: self.inbox_tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Handle for the manager to reach this thread once it is spawned
    pub(crate) fn handle(&self) -> ThreadHandle {
        ThreadHandle {
            tag: self.tag,
            tx: self.inbox_tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    fn desired_interest(conn: &dyn Conduit) -> Option<Interest> {
        match (conn.read_interest(), conn.write_interest()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Adopt a record: allocate its token and register its stream with the
    /// interest currently requested on the record
    pub(crate) fn attach(&mut self, conn: Box<dyn Conduit>) -> Result<ConnectionId> {
        let id = conn.id();
        self.conns.insert(id, conn);
        self.sync_registration(id)?;
        Ok(id)
    }

    /// Bring the selector registration in line with the record's interest flags
    pub(crate) fn sync_registration(&mut self, id: ConnectionId) -> Result<()> {
        let conn = match self.conns.get_mut(&id) {
            Some(conn) => conn,
            None => return Ok(()),
        };
        let interest = Self::desired_interest(conn.as_ref());
        let registered = conn.token();

        match (registered, interest) {
            (None, Some(interest)) => {
                let token = Token(self.tokens.insert(TokenSlot::Connection(id)));
                conn.set_token(Some(token));
                if let Some(stream) = conn.stream() {
                    self.poll.registry().register(stream, token, interest)?;
                }
            }
            (Some(token), Some(interest)) => {
                if let Some(stream) = conn.stream() {
                    self.poll.registry().reregister(stream, token, interest)?;
                }
            }
            (Some(token), None) => {
                if let Some(stream) = conn.stream() {
                    let _ = self.poll.registry().deregister(stream);
                }
                conn.set_token(None);
                self.tokens.remove(token.0);
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Remove a record from this thread, cancelling its registration
    pub(crate) fn detach(&mut self, id: ConnectionId) -> Option<Box<dyn Conduit>> {
        let mut conn = self.conns.remove(&id)?;
        if let Some(token) = conn.token() {
            if let Some(stream) = conn.stream() {
                let _ = self.poll.registry().deregister(stream);
            }
            conn.set_token(None);
            self.tokens.remove(token.0);
        }
        Some(conn)
    }

    /// Resolve the connection registered at a ready token
    pub(crate) fn connection_at(&self, token: Token) -> Option<ConnectionId> {
        match self.tokens.get(token.0) {
            Some(TokenSlot::Connection(id)) => Some(*id),
            _ => None,
        }
    }

    /// Error-terminate a connection: record the cause, fail a pending init,
    /// run the closing callbacks, and release every resource
    pub(crate) fn fail_connection(&mut self, id: ConnectionId, error: Arc<MuxError>) {
        let mut conn = match self.detach(id) {
            Some(conn) => conn,
            None => return,
        };
        warn!(
            thread = %self.name,
            conn = conn.name(),
            id = %id,
            error = %error,
            "connection failed"
        );
        conn.record_error(Arc::clone(&error));
        conn.fail_init(error);
        if let Err(e) = conn.begin_close(ClosingCause::Error) {
            debug!(thread = %self.name, error = %e, "closing traversal failed during error close");
        }
        conn.finish_close();
    }

    /// Complete a graceful close whose drain has finished
    pub(crate) fn finalize_close(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.detach(id) {
            conn.finish_close();
            debug!(thread = %self.name, conn = conn.name(), id = %id, "connection closed");
        }
    }

    /// Snapshot every connection owned by this thread
    pub(crate) fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.conns.values().map(|conn| conn.info()).collect()
    }

    /// The cause to signal on shutdown
    pub(crate) fn cancellation(&self) -> Arc<MuxError> {
        self.shutdown_cause
            .clone()
            .unwrap_or_else(|| Arc::new(MuxError::Cancelled))
    }
}

/// Handle to a spawned selector thread
pub(crate) struct ThreadHandle {
    pub tag: usize,
    pub tx: Sender<InterestEvent>,
    pub waker: Arc<Waker>,
}

impl ThreadHandle {
    /// Deliver an event and wake the selector
    pub(crate) fn submit(&self, event: InterestEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| MuxError::ChannelClosed)?;
        self.waker.wake()?;
        Ok(())
    }

    /// Route external submissions to this thread
    pub(crate) fn router(&self) -> Router {
        Router {
            tag: self.tag,
            tx: self.tx.clone(),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Request a snapshot of the thread's connections
    pub(crate) fn request_connections(&self) -> RequestFuture<Vec<ConnectionInfo>> {
        let (reply, future) = Promise::pair();
        let _ = self.submit(InterestEvent::internal(
            InterestKind::GetConnections,
            EventPayload::Connections(reply),
        ));
        future
    }

    /// Request a snapshot of the bound listening addresses
    pub(crate) fn request_bound_addresses(&self) -> RequestFuture<Vec<SocketAddr>> {
        let (reply, future) = Promise::pair();
        let _ = self.submit(InterestEvent::internal(
            InterestKind::GetBoundAddresses,
            EventPayload::BoundAddresses(reply),
        ));
        future
    }

    /// Ask the thread to stop
    pub(crate) fn shutdown(&self, cause: Option<Arc<MuxError>>) {
        let _ = self.submit(InterestEvent::internal(
            InterestKind::Shutdown,
            EventPayload::ShutdownCause(cause),
        ));
    }
}
