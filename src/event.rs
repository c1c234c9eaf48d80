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

//! Interest events
//!
//! External requests and internal control traffic reach an engine thread as
//! [`InterestEvent`]s through its inbox. Connection-targeted events carry the
//! originating proxy as their source; internal requests carry none.

use crate::connection::{Conduit, ProxyCore};
use crate::error::MuxError;
use crate::future::Promise;
use crate::types::ConnectionInfo;
use mio::net::TcpStream;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

/// The kind of an [`InterestEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InterestKind {
    /// Initialize by connecting to a remote address
    Connect = 0,
    /// Initialize by listening for one inbound peer on an address
    Accept = 1,
    /// Initialize by adopting an already-established stream
    Register = 2,
    /// Graceful user close
    Close = 3,
    /// Error close
    Error = 4,
    /// Run a closure on the owner thread
    Execute = 5,
    /// Transfer ownership of a connection record to the receiving thread
    Dispatch = 6,
    /// Toggle read/write interest on the owner's selector
    Op = 7,
    /// Stop the receiving thread
    Shutdown = 8,
    /// Snapshot the receiving thread's connections
    GetConnections = 9,
    /// Snapshot the bound listening addresses
    GetBoundAddresses = 10,
}

impl InterestKind {
    pub(crate) const COUNT: usize = 11;

    pub(crate) fn ordinal(self) -> usize {
        self as usize
    }

    /// Check whether events of this kind target a connection
    pub(crate) fn targets_connection(self) -> bool {
        !matches!(
            self,
            InterestKind::Shutdown | InterestKind::GetConnections | InterestKind::GetBoundAddresses
        )
    }
}

/// Requested interest toggle carried by an [`InterestKind::Op`] event
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OpChange {
    /// Desired read interest, if any change is requested
    pub read: Option<bool>,
    /// Desired write interest, if any change is requested
    pub write: Option<bool>,
}

/// Payload of an [`InterestEvent`]
pub(crate) enum EventPayload {
    /// Target address and completion promise for a connect request
    Connect {
        addr: SocketAddr,
        reply: Promise<SocketAddr>,
    },
    /// Listening address and completion promise for an accept request
    Accept {
        addr: SocketAddr,
        reply: Promise<SocketAddr>,
    },
    /// Established stream and completion promise for a register request
    Register {
        stream: TcpStream,
        reply: Promise<SocketAddr>,
    },
    /// No argument
    None,
    /// Error to record on the target connection
    Error(Arc<MuxError>),
    /// Closure to run on the owner thread
    Execute(Box<dyn FnOnce() + Send>),
    /// Owned connection record changing threads
    Record(Box<dyn Conduit>),
    /// Interest toggle
    Op(OpChange),
    /// Shutdown cause, if other than cancellation
    ShutdownCause(Option<Arc<MuxError>>),
    /// Reply channel for a connection snapshot request
    Connections(Promise<Vec<ConnectionInfo>>),
    /// Reply channel for a bound-address snapshot request
    BoundAddresses(Promise<Vec<SocketAddr>>),
}

/// A tagged request delivered to an engine thread's inbox
pub(crate) struct InterestEvent {
    pub kind: InterestKind,
    pub payload: EventPayload,
    /// Originating connection proxy; absent for internal requests
    pub source: Option<Arc<ProxyCore>>,
}

impl InterestEvent {
    /// An internal request with no originating connection
    pub(crate) fn internal(kind: InterestKind, payload: EventPayload) -> Self {
        Self {
            kind,
            payload,
            source: None,
        }
    }

    /// A request targeting the given connection
    pub(crate) fn targeting(kind: InterestKind, payload: EventPayload, source: Arc<ProxyCore>) -> Self {
        Self {
            kind,
            payload,
            source: Some(source),
        }
    }
}

impl fmt::Debug for InterestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("InterestEvent");
        dbg.field("kind", &self.kind);
        if let Some(source) = &self.source {
            dbg.field("source", &source.id());
        }
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_targets_connection() {
        assert!(InterestKind::Connect.targets_connection());
        assert!(InterestKind::Close.targets_connection());
        assert!(InterestKind::Dispatch.targets_connection());
        assert!(!InterestKind::Shutdown.targets_connection());
        assert!(!InterestKind::GetConnections.targets_connection());
        assert!(!InterestKind::GetBoundAddresses.targets_connection());
    }

    #[test]
    fn test_kind_ordinals_are_dense() {
        let kinds = [
            InterestKind::Connect,
            InterestKind::Accept,
            InterestKind::Register,
            InterestKind::Close,
            InterestKind::Error,
            InterestKind::Execute,
            InterestKind::Dispatch,
            InterestKind::Op,
            InterestKind::Shutdown,
            InterestKind::GetConnections,
            InterestKind::GetBoundAddresses,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.ordinal(), i);
        }
        assert_eq!(kinds.len(), InterestKind::COUNT);
    }
}
