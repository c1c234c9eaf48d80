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

//! Error types for the connection engine

use crate::event::InterestKind;
use crate::types::ConnectionStatus;
use std::sync::Arc;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, MuxError>;

/// Connection engine error types
#[derive(Debug, Error)]
pub enum MuxError {
    /// I/O error from the underlying socket or selector
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Listening on a wildcard port was requested
    #[error("wildcard ports are not allowed")]
    WildcardPort,

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A frame exceeded the configured maximum size
    #[error("frame of {size} bytes exceeds the {max} byte maximum")]
    FrameTooLarge {
        /// Observed frame size
        size: usize,
        /// Configured maximum
        max: usize,
    },

    /// An event arrived in a state with no registered transition
    #[error("no transition for status {status} on {kind:?}")]
    ProtocolViolation {
        /// Connection status at lookup time
        status: ConnectionStatus,
        /// Event kind that missed
        kind: InterestKind,
    },

    /// A filter chain stage received a message of a foreign type
    #[error("filter chain stage received a foreign message type")]
    FilterMismatch,

    /// The connection is closing or closed
    #[error("connection closed")]
    ConnectionClosed,

    /// The engine is shutting down
    #[error("operation cancelled by shutdown")]
    Cancelled,

    /// The target engine thread is gone
    #[error("engine thread is no longer running")]
    ChannelClosed,

    /// A request future was not completed within the caller's deadline
    #[error("request timed out")]
    Timeout,

    /// An inbound payload was not valid UTF-8
    #[error("invalid utf-8 payload: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// An error captured elsewhere and surfaced through a second path
    #[error(transparent)]
    Shared(#[from] Arc<MuxError>),
}

impl MuxError {
    /// Check if the error is fatal to its connection
    ///
    /// Everything except a timed-out request future terminates the affected
    /// connection; sibling connections and the selector threads are never
    /// affected.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, MuxError::Timeout)
    }

    /// Check if the error was caused by engine shutdown
    pub fn is_cancellation(&self) -> bool {
        match self {
            MuxError::Cancelled | MuxError::ChannelClosed => true,
            MuxError::Shared(inner) => inner.is_cancellation(),
            _ => false,
        }
    }
}
