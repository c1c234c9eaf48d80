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

//! Dispatch thread
//!
//! The dispatch thread owns every connection from creation until it becomes
//! active: it opens outbound connects, coalesces pending accepts on shared
//! listening sockets, binds filter chains, and hands established
//! connections to the I/O pool round-robin. It also answers the manager's
//! enumeration requests and drives the ordered shutdown.

use crate::config::ManagerConfig;
use crate::connection::Router;
use crate::error::{MuxError, Result};
use crate::event::{EventPayload, InterestEvent, InterestKind};
use crate::registry::AcceptRegistry;
use crate::selector::{SelectorCore, TokenSlot};
use crate::state::StateTable;
use crate::types::{ClosingCause, ConnectionId, ConnectionStatus};
use mio::net::TcpStream;
use mio::{Events, Token};
use std::io;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

pub(crate) struct DispatchThread {
    core: SelectorCore,
    registry: AcceptRegistry,
    io_routes: Vec<Router>,
    next_io: usize,
    table: StateTable<ConnectionStatus, InterestKind, DispatchThread>,
}

impl DispatchThread {
    pub(crate) fn new(
        name: String,
        tag: usize,
        config: &ManagerConfig,
        io_routes: Vec<Router>,
    ) -> Result<Self> {
        Ok(Self {
            core: SelectorCore::new(name, tag, config.select_timeout)?,
            registry: AcceptRegistry::new(config.backlog),
            io_routes,
            next_io: 0,
            table: Self::transitions(),
        })
    }

    pub(crate) fn core(&self) -> &SelectorCore {
        &self.core
    }

    fn transitions() -> StateTable<ConnectionStatus, InterestKind, DispatchThread> {
        use ConnectionStatus::{Accept, Connect, Virgin};
        use InterestKind::{Close, Error, Execute};

        StateTable::builder()
            .on(Virgin, InterestKind::Connect).run(Self::handle_connect)
            .on(Virgin, InterestKind::Accept).run(Self::handle_accept)
            .on(Virgin, InterestKind::Register).run(Self::handle_register)
            .on(Virgin, Close).run(Self::handle_close)
            .on(Connect, Close).run(Self::handle_close)
            .on(Accept, Close).run(Self::handle_close)
            .on(Virgin, Error).run(Self::handle_error_event)
            .on(Connect, Error).run(Self::handle_error_event)
            .on(Accept, Error).run(Self::handle_error_event)
            .on(Virgin, Execute).run(Self::handle_execute)
            .on(Connect, Execute).run(Self::handle_execute)
            .on(Accept, Execute).run(Self::handle_execute)
            .build()
    }

    pub(crate) fn run(mut self) {
        debug!(thread = %self.core.name, "dispatch thread started");
        let mut events = Events::with_capacity(256);

        while self.core.running {
            self.drain_inbox();
            if !self.core.running {
                break;
            }
            if let Err(e) = self.core.poll.poll(&mut events, Some(self.core.select_timeout)) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(thread = %self.core.name, error = %e, "selector failure");
                self.core.shutdown_cause = Some(Arc::new(e.into()));
                break;
            }
            for event in events.iter() {
                self.handle_ready(event.token(), event.is_readable(), event.is_writable());
            }
        }

        self.on_stop();
    }

    /// Ordered shutdown: bad news for pending accepts first, then the
    /// remaining local connections, then the I/O pool
    fn on_stop(&mut self) {
        let cause = self.core.cancellation();

        for id in self.registry.all_pending() {
            self.purge(id);
            self.core.fail_connection(id, Arc::clone(&cause));
        }
        let survivors: Vec<ConnectionId> = self.core.conns.keys().copied().collect();
        for id in survivors {
            self.core.fail_connection(id, Arc::clone(&cause));
        }

        for route in &self.io_routes {
            let _ = route.tx.send(InterestEvent::internal(
                InterestKind::Shutdown,
                EventPayload::ShutdownCause(Some(Arc::clone(&cause))),
            ));
            let _ = route.waker.wake();
        }
        debug!(thread = %self.core.name, "dispatch thread stopped");
    }

    /// Remove a connection's accept-registry membership, releasing the
    /// listener when it was the last pending accept
    fn purge(&mut self, id: ConnectionId) {
        if let Some(token) = self.registry.remove_pending(id, self.core.poll.registry()) {
            self.core.tokens.remove(token.0);
        }
    }

    fn fail(&mut self, id: ConnectionId, error: Arc<MuxError>) {
        self.purge(id);
        self.core.fail_connection(id, error);
    }

    fn drain_inbox(&mut self) {
        while let Ok(event) = self.core.inbox_rx.try_recv() {
            self.deliver(event);
        }
    }

    fn deliver(&mut self, event: InterestEvent) {
        if !event.kind.targets_connection() {
            return self.handle_internal(event);
        }
        if event.kind == InterestKind::Dispatch {
            // A freshly created record arriving from the manager.
            if let EventPayload::Record(conn) = event.payload {
                trace!(thread = %self.core.name, conn = conn.name(), "adopting new connection");
                self.core.conns.insert(conn.id(), conn);
            }
            return;
        }

        let source = match &event.source {
            Some(source) => Arc::clone(source),
            None => return,
        };
        let id = source.id();

        if !self.core.conns.contains_key(&id) {
            // Handed off or closed; route through the proxy unless that
            // would loop straight back here.
            if source.status() != ConnectionStatus::Closed && !source.routes_to(self.core.tag) {
                let _ = source.submit(event);
            }
            return;
        }

        let status = self
            .core
            .conns
            .get(&id)
            .map(|conn| conn.status())
            .unwrap_or(ConnectionStatus::Closed);
        match self.table.lookup(status, event.kind) {
            Some(entry) => {
                (entry.run)(self, event);
                if let Some(next) = entry.next {
                    if let Some(conn) = self.core.conns.get_mut(&id) {
                        conn.set_status(next);
                    }
                }
            }
            None => {
                let violation = Arc::new(MuxError::ProtocolViolation {
                    status,
                    kind: event.kind,
                });
                self.fail(id, violation);
            }
        }
    }

    fn handle_internal(&mut self, event: InterestEvent) {
        match event.payload {
            EventPayload::BoundAddresses(reply) => reply.complete(self.registry.addresses()),
            EventPayload::Connections(reply) => {
                // Aggregate of the I/O threads' reports; connections still
                // pending here are not yet established.
                let mut all = Vec::new();
                for route in &self.io_routes {
                    let (inner_reply, future) = crate::future::Promise::pair();
                    let submitted = route
                        .tx
                        .send(InterestEvent::internal(
                            InterestKind::GetConnections,
                            EventPayload::Connections(inner_reply),
                        ))
                        .is_ok()
                        && route.waker.wake().is_ok();
                    if submitted {
                        if let Ok(infos) = future.wait() {
                            all.extend(infos);
                        }
                    }
                }
                reply.complete(all);
            }
            EventPayload::ShutdownCause(cause) => {
                self.core.shutdown_cause = cause;
                self.core.running = false;
            }
            _ => {}
        }
    }

    /// Open an outbound connect and wait for writability to confirm it
    fn handle_connect(&mut self, event: InterestEvent) {
        let id = match &event.source {
            Some(source) => source.id(),
            None => return,
        };
        let (addr, reply) = match event.payload {
            EventPayload::Connect { addr, reply } => (addr, reply),
            _ => return,
        };

        if let Some(conn) = self.core.conns.get_mut(&id) {
            conn.set_init(reply);
        }

        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(id, Arc::new(e.into()));
                return;
            }
        };

        if let Some(conn) = self.core.conns.get_mut(&id) {
            conn.install(stream);
            // Writability signals connect completion.
            conn.set_write_interest(true);
            conn.set_status(ConnectionStatus::Connect);
        }
        debug!(thread = %self.core.name, id = %id, peer = %addr, "connecting");
        if let Err(e) = self.core.sync_registration(id) {
            self.fail(id, Arc::new(e));
        }
    }

    /// Queue the connection on its listening address
    fn handle_accept(&mut self, event: InterestEvent) {
        let id = match &event.source {
            Some(source) => source.id(),
            None => return,
        };
        let (addr, reply) = match event.payload {
            EventPayload::Accept { addr, reply } => (addr, reply),
            _ => return,
        };

        if let Some(conn) = self.core.conns.get_mut(&id) {
            conn.set_init(reply);
        }

        let registered = self.registry.register(
            id,
            addr,
            self.core.poll.registry(),
            &mut self.core.tokens,
        );
        match registered {
            Ok(entry) => {
                debug!(
                    thread = %self.core.name,
                    id = %id,
                    listen = %entry.address,
                    queued = entry.pending.len(),
                    "listening"
                );
                if let Some(conn) = self.core.conns.get_mut(&id) {
                    conn.set_status(ConnectionStatus::Accept);
                }
            }
            Err(e) => self.fail(id, Arc::new(e)),
        }
    }

    /// Adopt an established stream and activate it immediately
    fn handle_register(&mut self, event: InterestEvent) {
        let id = match &event.source {
            Some(source) => source.id(),
            None => return,
        };
        let stream = match event.payload {
            EventPayload::Register { stream, reply } => {
                if let Some(conn) = self.core.conns.get_mut(&id) {
                    conn.set_init(reply);
                }
                stream
            }
            _ => return,
        };

        let bound = match self.core.conns.get_mut(&id) {
            Some(conn) => {
                conn.install(stream);
                conn.bind()
            }
            None => return,
        };
        match bound {
            Ok(()) => {
                debug!(thread = %self.core.name, id = %id, "registered");
                if let Some(conn) = self.core.conns.get_mut(&id) {
                    conn.set_status(ConnectionStatus::Active);
                }
                self.handoff(id);
            }
            Err(e) => self.fail(id, Arc::new(e)),
        }
    }

    /// Close before activation: nothing is deferred yet, so close in place
    fn handle_close(&mut self, event: InterestEvent) {
        let id = match event.source {
            Some(source) => source.id(),
            None => return,
        };
        self.purge(id);
        let begun = match self.core.conns.get_mut(&id) {
            Some(conn) => conn.begin_close(ClosingCause::User),
            None => return,
        };
        if let Err(e) = begun {
            self.fail(id, Arc::new(e));
            return;
        }
        self.core.finalize_close(id);
    }

    fn handle_error_event(&mut self, event: InterestEvent) {
        let id = match event.source {
            Some(source) => source.id(),
            None => return,
        };
        let error = match event.payload {
            EventPayload::Error(error) => error,
            _ => Arc::new(MuxError::ConnectionClosed),
        };
        self.fail(id, error);
    }

    fn handle_execute(&mut self, event: InterestEvent) {
        if let EventPayload::Execute(work) = event.payload {
            work();
        }
    }

    fn handle_ready(&mut self, token: Token, readable: bool, writable: bool) {
        match self.core.tokens.get(token.0).copied() {
            Some(TokenSlot::Listener(_)) if readable => self.do_accept(token),
            Some(TokenSlot::Connection(id)) if writable => self.do_connect(id),
            _ => {}
        }
    }

    /// Finish the accept cycle on a ready listening socket
    ///
    /// Readiness is edge-style, so the listener is drained for as long as
    /// accepts are both available and pending.
    fn do_accept(&mut self, token: Token) {
        loop {
            let (head, accepted) = match self.registry.entry_at(token) {
                Some(entry) => {
                    let head = match entry.pending.front().copied() {
                        Some(head) => head,
                        // The entry exists only while accepts are pending.
                        None => return,
                    };
                    (head, entry.listener.accept())
                }
                None => return,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.purge(head);
                    let bound = match self.core.conns.get_mut(&head) {
                        Some(conn) => {
                            conn.install(stream);
                            conn.bind()
                        }
                        None => {
                            // Pending bookkeeping without a record; drop the
                            // socket and move on.
                            continue;
                        }
                    };
                    match bound {
                        Ok(()) => {
                            debug!(thread = %self.core.name, id = %head, peer = %peer, "accepted");
                            if let Some(conn) = self.core.conns.get_mut(&head) {
                                conn.set_status(ConnectionStatus::Active);
                            }
                            self.handoff(head);
                        }
                        Err(e) => self.fail(head, Arc::new(e)),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // A failed accept dooms every connection pending on this
                    // entry; each observes the same cause.
                    let cause = Arc::new(MuxError::from(e));
                    let pending = match self.registry.entry_of(head) {
                        Some(entry) => entry.pending.iter().copied().collect::<Vec<_>>(),
                        None => vec![head],
                    };
                    for id in pending {
                        self.fail(id, Arc::clone(&cause));
                    }
                    return;
                }
            }
        }
    }

    /// Confirm a ready outbound connect
    ///
    /// Writability on a connecting socket can be spurious; a pending
    /// connect stays registered and keeps waiting rather than erroring.
    fn do_connect(&mut self, id: ConnectionId) {
        enum Confirm {
            Connected,
            StillPending,
            Failed(io::Error),
        }

        let confirm = match self.core.conns.get_mut(&id) {
            Some(conn) => match conn.stream() {
                Some(stream) => match stream.take_error() {
                    Ok(Some(e)) => Confirm::Failed(e),
                    Ok(None) => match stream.peer_addr() {
                        Ok(_) => Confirm::Connected,
                        Err(e) if e.kind() == io::ErrorKind::NotConnected => Confirm::StillPending,
                        Err(e) => Confirm::Failed(e),
                    },
                    Err(e) => Confirm::Failed(e),
                },
                None => return,
            },
            None => return,
        };

        match confirm {
            Confirm::StillPending => {}
            Confirm::Failed(e) => self.fail(id, Arc::new(e.into())),
            Confirm::Connected => {
                let bound = match self.core.conns.get_mut(&id) {
                    Some(conn) => {
                        conn.set_write_interest(false);
                        conn.bind()
                    }
                    None => return,
                };
                match bound {
                    Ok(()) => {
                        debug!(thread = %self.core.name, id = %id, "connected");
                        if let Some(conn) = self.core.conns.get_mut(&id) {
                            conn.set_status(ConnectionStatus::Active);
                        }
                        self.handoff(id);
                    }
                    Err(e) => self.fail(id, Arc::new(e)),
                }
            }
        }
    }

    /// Transfer an active connection to the next I/O thread round-robin
    fn handoff(&mut self, id: ConnectionId) {
        if self.io_routes.is_empty() {
            self.fail(id, Arc::new(MuxError::ChannelClosed));
            return;
        }
        let route = self.io_routes[self.next_io].duplicate();
        self.next_io = (self.next_io + 1) % self.io_routes.len();

        let conn = match self.core.detach(id) {
            Some(conn) => conn,
            None => return,
        };
        let proxy = Arc::clone(conn.proxy());
        trace!(thread = %self.core.name, id = %id, target = route.tag, "handing off");

        let event = InterestEvent::targeting(
            InterestKind::Dispatch,
            EventPayload::Record(conn),
            Arc::clone(&proxy),
        );
        // Enqueue and reroute under the proxy's router lock so submissions
        // during the window land behind the record, never ahead of it.
        let delivered = proxy.handoff(route.duplicate(), move || {
            route.tx.send(event).map_err(|_| MuxError::ChannelClosed)?;
            route.waker.wake()?;
            Ok(())
        });
        if let Err(e) = delivered {
            warn!(thread = %self.core.name, id = %id, error = %e, "handoff failed");
        }
    }
}
