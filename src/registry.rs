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

//! Accept registry
//!
//! Bookkeeping for pending accepts on shared listening sockets, owned
//! exclusively by the dispatch thread. All connections accepting on the
//! same resolved address share one listening socket; the socket is bound
//! when the first pending accept registers and released, together with its
//! token, when the last one leaves.

use crate::error::{MuxError, Result};
use crate::selector::TokenSlot;
use crate::types::ConnectionId;
use mio::net::TcpListener;
use mio::{Interest, Registry, Token};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

/// Bind a reusable, non-blocking listening socket with the given backlog
fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog as i32)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// One bound listening socket and its ordered pending accepts
#[derive(Debug)]
pub(crate) struct Entry {
    /// The resolved listening address
    pub address: SocketAddr,
    /// The shared listening socket
    pub listener: TcpListener,
    /// The listener's registration token on the dispatch selector
    pub token: Token,
    /// Connections awaiting a peer, in registration order
    pub pending: VecDeque<ConnectionId>,
}

/// Pending-accept bookkeeping for the dispatch thread
pub(crate) struct AcceptRegistry {
    backlog: u32,
    entries: HashMap<SocketAddr, Entry>,
    memberships: HashMap<ConnectionId, SocketAddr>,
}

impl AcceptRegistry {
    pub(crate) fn new(backlog: u32) -> Self {
        Self {
            backlog,
            entries: HashMap::new(),
            memberships: HashMap::new(),
        }
    }

    /// Register a pending accept, binding a new listening socket on first use
    ///
    /// A token is allocated from `tokens` only when a new listener must be
    /// created. Wildcard ports are rejected.
    pub(crate) fn register(
        &mut self,
        conn: ConnectionId,
        addr: SocketAddr,
        registry: &Registry,
        tokens: &mut Slab<TokenSlot>,
    ) -> Result<&Entry> {
        if addr.port() == 0 {
            return Err(MuxError::WildcardPort);
        }

        if !self.entries.contains_key(&addr) {
            let mut listener = bind_listener(addr, self.backlog)?;
            let token = Token(tokens.insert(TokenSlot::Listener(addr)));
            if let Err(e) = registry.register(&mut listener, token, Interest::READABLE) {
                tokens.remove(token.0);
                return Err(e.into());
            }
            self.entries.insert(
                addr,
                Entry {
                    address: addr,
                    listener,
                    token,
                    pending: VecDeque::new(),
                },
            );
        }

        let entry = self
            .entries
            .get_mut(&addr)
            .ok_or(MuxError::ConnectionClosed)?;
        entry.pending.push_back(conn);
        self.memberships.insert(conn, addr);
        Ok(entry)
    }

    /// Remove a pending accept
    ///
    /// When the entry's pending set empties, the listening socket is
    /// deregistered and closed and its token is returned for release.
    pub(crate) fn remove_pending(
        &mut self,
        conn: ConnectionId,
        registry: &Registry,
    ) -> Option<Token> {
        let addr = self.memberships.remove(&conn)?;
        let entry = self.entries.get_mut(&addr)?;
        entry.pending.retain(|&pending| pending != conn);

        if entry.pending.is_empty() {
            let mut entry = self.entries.remove(&addr)?;
            let _ = registry.deregister(&mut entry.listener);
            return Some(entry.token);
        }
        None
    }

    /// Look up the entry registered under the given token
    pub(crate) fn entry_at(&mut self, token: Token) -> Option<&mut Entry> {
        self.entries.values_mut().find(|entry| entry.token == token)
    }

    /// The entry a connection is pending on, if any
    pub(crate) fn entry_of(&mut self, conn: ConnectionId) -> Option<&mut Entry> {
        let addr = self.memberships.get(&conn)?;
        self.entries.get_mut(addr)
    }

    /// Snapshot of the currently bound addresses
    pub(crate) fn addresses(&self) -> Vec<SocketAddr> {
        self.entries.keys().copied().collect()
    }

    /// All pending accepts across every entry
    pub(crate) fn all_pending(&self) -> Vec<ConnectionId> {
        self.entries
            .values()
            .flat_map(|entry| entry.pending.iter().copied())
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Poll;

    fn free_port() -> SocketAddr {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    }

    #[test]
    fn test_wildcard_port_rejected() {
        let poll = Poll::new().unwrap();
        let mut tokens = Slab::new();
        let mut registry = AcceptRegistry::new(16);
        let err = registry
            .register(
                ConnectionId::next(),
                "127.0.0.1:0".parse().unwrap(),
                poll.registry(),
                &mut tokens,
            )
            .unwrap_err();
        assert!(matches!(err, MuxError::WildcardPort));
        assert!(registry.is_empty());
        assert!(tokens.is_empty());
    }

    #[test]
    fn test_accept_coalescing() {
        let poll = Poll::new().unwrap();
        let mut tokens = Slab::new();
        let mut registry = AcceptRegistry::new(16);
        let addr = free_port();

        let first = ConnectionId::next();
        let second = ConnectionId::next();

        registry
            .register(first, addr, poll.registry(), &mut tokens)
            .unwrap();
        // The second accept joins the existing entry without a new token.
        let entry = registry
            .register(second, addr, poll.registry(), &mut tokens)
            .unwrap();
        assert_eq!(entry.pending.len(), 2);
        assert_eq!(entry.pending[0], first);
        assert_eq!(tokens.len(), 1);
        assert_eq!(registry.addresses(), vec![addr]);

        assert_eq!(registry.remove_pending(first, poll.registry()), None);
        assert_eq!(registry.addresses(), vec![addr]);

        let released = registry.remove_pending(second, poll.registry());
        assert!(released.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let poll = Poll::new().unwrap();
        let mut registry = AcceptRegistry::new(16);
        assert_eq!(registry.remove_pending(ConnectionId::next(), poll.registry()), None);
    }

    #[test]
    fn test_pending_order_preserved() {
        let poll = Poll::new().unwrap();
        let mut tokens = Slab::new();
        let mut registry = AcceptRegistry::new(16);
        let addr = free_port();

        let ids: Vec<ConnectionId> = (0..3).map(|_| ConnectionId::next()).collect();
        for &id in &ids {
            registry
                .register(id, addr, poll.registry(), &mut tokens)
                .unwrap();
        }

        let token = registry.entry_of(ids[0]).map(|entry| entry.token).unwrap();
        let entry = registry.entry_at(token).unwrap();
        assert_eq!(entry.pending.iter().copied().collect::<Vec<_>>(), ids);
        assert_eq!(registry.all_pending(), ids);
    }
}
