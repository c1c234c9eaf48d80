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

//! I/O threads
//!
//! An I/O thread owns established connections after the dispatch handoff.
//! It multiplexes read/write readiness, pushes inbound batches through each
//! connection's filter chain, drains deferred writes, and drives the
//! graceful-close states: an end-of-stream clears read interest and flushes
//! pending writes before the channel closes, a user close waits for the
//! reservoir to drain, and an error closes immediately.

use crate::config::ManagerConfig;
use crate::connection::{ReadOutcome, WriteOutcome};
use crate::error::{MuxError, Result};
use crate::event::{EventPayload, InterestEvent, InterestKind};
use crate::selector::SelectorCore;
use crate::state::StateTable;
use crate::types::{ClosingCause, ConnectionId, ConnectionStatus};
use mio::{Events, Token};
use std::io;
use std::sync::Arc;
use tracing::{debug, error, trace};

pub(crate) struct IoThread {
    core: SelectorCore,
    table: StateTable<ConnectionStatus, InterestKind, IoThread>,
}

impl IoThread {
    pub(crate) fn new(name: String, tag: usize, config: &ManagerConfig) -> Result<Self> {
        Ok(Self {
            core: SelectorCore::new(name, tag, config.select_timeout)?,
            table: Self::transitions(),
        })
    }

    pub(crate) fn core(&self) -> &SelectorCore {
        &self.core
    }

    fn transitions() -> StateTable<ConnectionStatus, InterestKind, IoThread> {
        use ConnectionStatus::{Active, Closing};
        use InterestKind::{Close, Error, Execute, Op};

        StateTable::builder()
            .on(Active, Close).run(Self::handle_close)
            .on(Closing, Close).run(Self::handle_close)
            .on(Active, Error).run(Self::handle_error_event)
            .on(Closing, Error).run(Self::handle_error_event)
            .on(Active, Execute).run(Self::handle_execute)
            .on(Closing, Execute).run(Self::handle_execute)
            .on(Active, Op).run(Self::handle_op)
            .on(Closing, Op).run(Self::handle_op)
            .build()
    }

    pub(crate) fn run(mut self) {
        debug!(thread = %self.core.name, "i/o thread started");
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
                // Selector failure is fatal to the thread; its connections
                // are signalled below.
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

    fn on_stop(&mut self) {
        let cause = self.core.cancellation();
        let survivors: Vec<ConnectionId> = self.core.conns.keys().copied().collect();
        for id in survivors {
            self.core.fail_connection(id, Arc::clone(&cause));
        }
        debug!(thread = %self.core.name, "i/o thread stopped");
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
            return self.handle_dispatch(event);
        }

        let source = match &event.source {
            Some(source) => Arc::clone(source),
            None => return,
        };
        let id = source.id();

        if !self.core.conns.contains_key(&id) {
            // Not owned here: either closed (absorb) or queued behind a
            // handoff (forward through the proxy's current route).
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
                self.core.fail_connection(id, violation);
            }
        }
    }

    fn handle_internal(&mut self, event: InterestEvent) {
        match event.payload {
            EventPayload::Connections(reply) => reply.complete(self.core.snapshot()),
            EventPayload::ShutdownCause(cause) => {
                self.core.shutdown_cause = cause;
                self.core.running = false;
            }
            _ => {}
        }
    }

    /// Adopt a record handed off by the dispatch thread
    fn handle_dispatch(&mut self, event: InterestEvent) {
        let mut conn = match event.payload {
            EventPayload::Record(conn) => conn,
            _ => return,
        };
        let id = conn.id();
        trace!(thread = %self.core.name, conn = conn.name(), id = %id, "adopting connection");

        conn.set_read_interest(true);
        conn.set_write_interest(conn.wants_write());
        if let Err(e) = self.core.attach(conn) {
            self.core.fail_connection(id, Arc::new(e));
            return;
        }

        // Cover sends that raced the handoff window.
        self.flush_and_gate(id);
    }

    /// Flush staged outbound traffic and re-gate write interest on the reservoir
    fn flush_and_gate(&mut self, id: ConnectionId) {
        let result = match self.core.conns.get_mut(&id) {
            Some(conn) => {
                let result = conn.flush_staged();
                conn.set_write_interest(conn.wants_write());
                result
            }
            None => return,
        };
        match result {
            Ok(()) => {
                if let Err(e) = self.core.sync_registration(id) {
                    self.core.fail_connection(id, Arc::new(e));
                }
            }
            Err(e) => self.core.fail_connection(id, Arc::new(e)),
        }
    }

    fn handle_close(&mut self, event: InterestEvent) {
        let id = match event.source {
            Some(source) => source.id(),
            None => return,
        };
        let begun = match self.core.conns.get_mut(&id) {
            Some(conn) => conn.begin_close(ClosingCause::User),
            None => return,
        };
        if let Err(e) = begun {
            self.core.fail_connection(id, Arc::new(e));
            return;
        }

        // Close immediately when nothing is deferred; otherwise wait for
        // write readiness to drain the reservoir first.
        let draining = match self.core.conns.get_mut(&id) {
            Some(conn) => {
                let draining = conn.wants_write();
                conn.set_write_interest(draining);
                draining
            }
            None => return,
        };
        if draining {
            if let Err(e) = self.core.sync_registration(id) {
                self.core.fail_connection(id, Arc::new(e));
            }
        } else {
            self.core.finalize_close(id);
        }
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
        self.core.fail_connection(id, error);
    }

    fn handle_execute(&mut self, event: InterestEvent) {
        if let EventPayload::Execute(work) = event.payload {
            work();
        }
    }

    fn handle_op(&mut self, event: InterestEvent) {
        let id = match event.source {
            Some(source) => source.id(),
            None => return,
        };
        let op = match event.payload {
            EventPayload::Op(op) => op,
            _ => return,
        };

        if let Some(conn) = self.core.conns.get_mut(&id) {
            if let Some(read) = op.read {
                // Read interest never returns after an end-of-stream.
                if conn.status() == ConnectionStatus::Active {
                    conn.set_read_interest(read);
                }
            }
        }

        match op.write {
            Some(true) => self.flush_and_gate(id),
            Some(false) => {
                if let Some(conn) = self.core.conns.get_mut(&id) {
                    conn.set_write_interest(false);
                }
                if let Err(e) = self.core.sync_registration(id) {
                    self.core.fail_connection(id, Arc::new(e));
                }
            }
            None => {
                if let Err(e) = self.core.sync_registration(id) {
                    self.core.fail_connection(id, Arc::new(e));
                }
            }
        }
    }

    fn handle_ready(&mut self, token: Token, readable: bool, writable: bool) {
        let id = match self.core.connection_at(token) {
            Some(id) => id,
            None => return,
        };

        if readable {
            let outcome = match self.core.conns.get_mut(&id) {
                Some(conn) => conn.read_ready(),
                None => return,
            };
            match outcome {
                Ok(ReadOutcome::Progress) => {}
                Ok(ReadOutcome::EndOfStream) => {
                    self.handle_end_of_stream(id);
                }
                Err(e) => {
                    self.core.fail_connection(id, Arc::new(e));
                    return;
                }
            }
        }

        if writable {
            let outcome = match self.core.conns.get_mut(&id) {
                Some(conn) => conn.write_ready(),
                None => return,
            };
            match outcome {
                Ok(WriteOutcome::Pending) => {}
                Ok(WriteOutcome::Drained) => {
                    let closing = match self.core.conns.get_mut(&id) {
                        Some(conn) => {
                            conn.set_write_interest(false);
                            conn.status() == ConnectionStatus::Closing
                        }
                        None => return,
                    };
                    if closing {
                        self.core.finalize_close(id);
                    } else if let Err(e) = self.core.sync_registration(id) {
                        self.core.fail_connection(id, Arc::new(e));
                    }
                }
                Err(e) => {
                    self.core.fail_connection(id, Arc::new(e));
                }
            }
        }
    }

    /// Half-close: stop reading, flush deferred writes, then close
    fn handle_end_of_stream(&mut self, id: ConnectionId) {
        let begun = match self.core.conns.get_mut(&id) {
            Some(conn) => {
                conn.set_read_interest(false);
                conn.begin_close(ClosingCause::EndOfStream)
            }
            None => return,
        };
        if let Err(e) = begun {
            self.core.fail_connection(id, Arc::new(e));
            return;
        }

        let draining = match self.core.conns.get_mut(&id) {
            Some(conn) => {
                let draining = conn.wants_write();
                conn.set_write_interest(draining);
                draining
            }
            None => return,
        };
        if draining {
            if let Err(e) = self.core.sync_registration(id) {
                self.core.fail_connection(id, Arc::new(e));
            }
        } else {
            self.core.finalize_close(id);
        }
    }
}
