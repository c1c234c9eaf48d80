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

//! Core identity and lifecycle types shared across the engine

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection (monotonically increasing, never reused)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next process-wide connection ID
    pub(crate) fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection lifecycle status
///
/// A connection is created in `Virgin`, moves to `Connect`, `Accept`, or
/// directly to `Active` depending on how it was initialized, and leaves
/// through `Closing` into `Closed` on end-of-stream, user close, or error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    /// Freshly created, not yet initialized
    Virgin = 0,
    /// Outbound connect issued, awaiting completion
    Connect = 1,
    /// Queued on a listening socket, awaiting an inbound peer
    Accept = 2,
    /// Established and registered for I/O
    Active = 3,
    /// Terminal cause observed, draining before the channel closes
    Closing = 4,
    /// Channel closed and resources released
    Closed = 5,
}

impl ConnectionStatus {
    pub(crate) const COUNT: usize = 6;

    /// Convert from u8 (for the atomic status mirror)
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Virgin,
            1 => Self::Connect,
            2 => Self::Accept,
            3 => Self::Active,
            4 => Self::Closing,
            _ => Self::Closed,
        }
    }

    /// Convert to u8 (for the atomic status mirror)
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn ordinal(self) -> usize {
        self as usize
    }

    /// Check if the connection has observed a terminal cause
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virgin => write!(f, "virgin"),
            Self::Connect => write!(f, "connect"),
            Self::Accept => write!(f, "accept"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a connection entered `Closing`
///
/// The first cause to arrive wins; later causes are absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClosingCause {
    /// The peer shut down its write side
    EndOfStream = 1,
    /// The application called `close`
    User = 2,
    /// An error was captured in the connection's error slot
    Error = 3,
}

impl ClosingCause {
    pub(crate) fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::EndOfStream),
            2 => Some(Self::User),
            3 => Some(Self::Error),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ClosingCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfStream => write!(f, "end-of-stream"),
            Self::User => write!(f, "user"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Connection information snapshot (for enumeration requests)
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection ID
    pub id: ConnectionId,
    /// Connection name
    pub name: String,
    /// Status at snapshot time
    pub status: ConnectionStatus,
    /// Local address, if the socket is installed
    pub local_addr: Option<SocketAddr>,
    /// Peer address, if the socket is connected
    pub peer_addr: Option<SocketAddr>,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} [{}]", self.name, self.id.as_u64(), self.status)
    }
}
