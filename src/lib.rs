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

//! Muxio - selector-driven connection engine
//!
//! Muxio accepts, connects, and multiplexes byte-oriented stream sockets
//! across a small pool of selector threads, and delivers application
//! messages through a composable, bidirectional filter pipeline.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                     ConnectionManager                         |
//! |  +----------------+       round-robin      +--------------+  |
//! |  | dispatch thread| --- handoff of owned -->|  i/o thread  |  |
//! |  |  accept/connect|      connection records |  read/write  |  |
//! |  |  accept registry|                        |  (x N)       |  |
//! |  +----------------+                        +--------------+  |
//! +--------------------------------------------------------------+
//!          ^                                        ^
//!          |  inbox (MPSC + waker)                  |
//!          +---------- ManagedConnection proxy -----+
//!                              |
//!                     application code
//! ```
//!
//! One *dispatch thread* performs every accept and connect, coalescing
//! accepts on shared listening sockets, and hands established connections
//! to the *I/O threads* round-robin. Each connection runs a small state
//! machine (`Virgin -> Connect|Accept -> Active -> Closing -> Closed`)
//! whose transitions are bound declaratively per thread; each thread is a
//! single cooperative loop over its own selector, so per-connection state
//! is never shared between threads.
//!
//! Application data crosses a per-connection [filter chain](ChainFilterBuilder):
//! a typed stack of bidirectional transforms with in-band out-of-band
//! events for bind, closing, and backpressure signals.
//!
//! # Quick start
//!
//! ```no_run
//! use muxio::{ChainFilterBuilder, ConnectionHandler, ConnectionManager};
//! use muxio::{FrameFilter, ManagerConfig, MessageQueue, Utf8Filter};
//! use bytes::Bytes;
//!
//! struct Printer;
//!
//! impl ConnectionHandler<String> for Printer {
//!     fn on_receive(&mut self, inbound: &mut MessageQueue<String>) {
//!         while let Some(line) = inbound.pop() {
//!             println!("{line}");
//!         }
//!     }
//! }
//!
//! # fn main() -> muxio::Result<()> {
//! let manager = ConnectionManager::new(ManagerConfig::new("quickstart"))?;
//!
//! let client = manager.new_connection(
//!     "client",
//!     ChainFilterBuilder::<Bytes, Bytes>::new()
//!         .add(|_| FrameFilter::new(64, 1 << 16))
//!         .add(|_| Utf8Filter),
//!     Printer,
//! )?;
//!
//! // Sends may be queued before the connection completes; they flush in
//! // order once it binds.
//! client.send("hello".to_string())?;
//! client.connect("127.0.0.1:10101".parse().unwrap()).wait()?;
//! client.close();
//! manager.close()?;
//! # Ok(())
//! # }
//! ```

mod buffer;
mod config;
mod connection;
mod dispatch;
mod error;
mod event;
mod filter;
mod future;
mod handler;
mod io;
mod manager;
mod registry;
mod selector;
mod state;
mod types;

pub use config::ManagerConfig;
pub use connection::ManagedConnection;
pub use error::{MuxError, Result};
pub use event::InterestKind;
pub use filter::{
    ChainFilterBuilder, Filter, FilterContext, FrameFilter, MessageQueue, OobEvent, OobFilter,
    QueueReader, QueueWriter, Utf8Filter,
};
pub use future::RequestFuture;
pub use handler::ConnectionHandler;
pub use manager::ConnectionManager;
pub use types::{ClosingCause, ConnectionId, ConnectionInfo, ConnectionStatus};
