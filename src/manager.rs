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

//! Connection manager
//!
//! The [`ConnectionManager`] owns one dispatch thread and a configurable
//! pool of I/O threads, all started on construction. It is the entry point
//! for creating connections, enumerating engine state, and the ordered
//! shutdown. Managers are explicit handles: create as many as needed and
//! pass them where connections are built; there is no process-wide default.
//!
//! # Example
//!
//! ```no_run
//! use muxio::{ChainFilterBuilder, ConnectionHandler, ConnectionManager};
//! use muxio::{FrameFilter, ManagerConfig, MessageQueue, Utf8Filter};
//! use bytes::Bytes;
//!
//! struct Echo;
//!
//! impl ConnectionHandler<String> for Echo {
//!     fn on_receive(&mut self, inbound: &mut MessageQueue<String>) {
//!         while let Some(line) = inbound.pop() {
//!             println!("peer says: {line}");
//!         }
//!     }
//! }
//!
//! # fn main() -> muxio::Result<()> {
//! let manager = ConnectionManager::new(ManagerConfig::new("demo"))?;
//! let conn = manager.new_connection(
//!     "client",
//!     ChainFilterBuilder::<Bytes, Bytes>::new()
//!         .add(|_| FrameFilter::new(64, 1 << 16))
//!         .add(|_| Utf8Filter),
//!     Echo,
//! )?;
//! conn.connect("127.0.0.1:10101".parse().unwrap()).wait()?;
//! conn.send("hello".to_string())?;
//! conn.close();
//! manager.close()?;
//! # Ok(())
//! # }
//! ```

use crate::config::ManagerConfig;
use crate::connection::{self, ManagedConnection};
use crate::dispatch::DispatchThread;
use crate::error::{MuxError, Result};
use crate::event::{EventPayload, InterestEvent, InterestKind};
use crate::filter::ChainFilterBuilder;
use crate::handler::ConnectionHandler;
use crate::io::IoThread;
use crate::selector::ThreadHandle;
use crate::types::ConnectionInfo;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

struct ManagerState {
    joins: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Owner of the engine's dispatch and I/O threads
pub struct ConnectionManager {
    config: ManagerConfig,
    dispatch: ThreadHandle,
    state: Mutex<ManagerState>,
}

impl ConnectionManager {
    /// Validate the configuration and start the engine threads
    pub fn new(config: ManagerConfig) -> Result<Self> {
        config.validate()?;

        let mut io_threads = Vec::with_capacity(config.io_threads);
        for i in 0..config.io_threads {
            io_threads.push(IoThread::new(
                format!("{}/io-{}", config.name, i),
                i + 1,
                &config,
            )?);
        }
        let io_routes = io_threads.iter().map(|t| t.core().router()).collect();

        let dispatch_thread = DispatchThread::new(
            format!("{}/dispatch", config.name),
            0,
            &config,
            io_routes,
        )?;
        let dispatch = dispatch_thread.core().handle();

        let mut joins = Vec::with_capacity(config.io_threads + 1);
        for io_thread in io_threads {
            let name = io_thread.core().name.clone();
            joins.push(thread::Builder::new().name(name).spawn(move || io_thread.run())?);
        }
        joins.push(
            thread::Builder::new()
                .name(format!("{}/dispatch", config.name))
                .spawn(move || dispatch_thread.run())?,
        );

        info!(manager = %config.name, io_threads = config.io_threads, "engine started");

        Ok(Self {
            config,
            dispatch,
            state: Mutex::new(ManagerState {
                joins,
                closed: false,
            }),
        })
    }

    /// The configuration this manager was started with
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create a managed connection
    ///
    /// The connection is created in `Virgin` status on the dispatch thread;
    /// initialize it with [`ManagedConnection::connect`],
    /// [`accept`](ManagedConnection::accept), or
    /// [`register`](ManagedConnection::register).
    pub fn new_connection<T, H>(
        &self,
        name: impl Into<String>,
        filters: ChainFilterBuilder<Bytes, T>,
        handler: H,
    ) -> Result<ManagedConnection<T>>
    where
        T: Send + 'static,
        H: ConnectionHandler<T>,
    {
        if self.state.lock().closed {
            return Err(MuxError::Cancelled);
        }

        let (proxy, record) = connection::create(
            name.into(),
            self.dispatch.router(),
            filters,
            Box::new(handler),
            self.config.minimum_buffer_size,
            self.config.maximum_buffer_size,
            self.config.write_high_water_mark,
        );
        self.dispatch.submit(InterestEvent::targeting(
            InterestKind::Dispatch,
            EventPayload::Record(record),
            proxy.core_handle(),
        ))?;
        Ok(proxy)
    }

    /// Snapshot of the currently bound listening addresses
    pub fn bound_addresses(&self) -> Result<Vec<SocketAddr>> {
        self.dispatch.request_bound_addresses().wait()
    }

    /// Snapshot of every established connection across the I/O pool
    pub fn connections(&self) -> Result<Vec<ConnectionInfo>> {
        self.dispatch.request_connections().wait()
    }

    /// Shut the engine down
    ///
    /// Pending accepts are errored, every connection observes the
    /// cancellation cause, and all engine threads exit before this returns.
    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        let joins = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            std::mem::take(&mut state.joins)
        };

        info!(manager = %self.config.name, "shutting down");
        self.dispatch.shutdown(None);
        for join in joins {
            let _ = join.join();
        }
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if !self.state.lock().closed {
            warn!(manager = %self.config.name, "manager dropped while still running");
            let _ = self.close();
        }
    }
}
