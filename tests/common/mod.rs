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

//! Shared helpers for the integration suites

// Each suite compiles this module separately and uses a different subset.
#![allow(dead_code)]

use bytes::Bytes;
use muxio::{
    ChainFilterBuilder, ClosingCause, ConnectionHandler, FrameFilter, MessageQueue, MuxError,
    Utf8Filter,
};
use std::net::SocketAddr;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Generous bound for every blocking wait in the suites
pub const WAIT: Duration = Duration::from_secs(5);

/// Everything a connection reports to its test
#[derive(Debug)]
pub enum Happening {
    Bound,
    Received(String),
    Closing(ClosingCause),
    Closed,
    Errored(String),
}

/// Handler that forwards every callback to the test thread
pub struct Reporter {
    tx: Sender<Happening>,
}

impl ConnectionHandler<String> for Reporter {
    fn on_bind(&mut self, _inbound: &mut MessageQueue<String>) {
        let _ = self.tx.send(Happening::Bound);
    }

    fn on_receive(&mut self, inbound: &mut MessageQueue<String>) {
        while let Some(message) = inbound.pop() {
            let _ = self.tx.send(Happening::Received(message));
        }
    }

    fn on_closing(&mut self, cause: ClosingCause, _pending: &mut MessageQueue<String>) {
        let _ = self.tx.send(Happening::Closing(cause));
    }

    fn on_close(&mut self) {
        let _ = self.tx.send(Happening::Closed);
    }

    fn on_error(&mut self, error: &MuxError, _pending: &[u8]) {
        let _ = self.tx.send(Happening::Errored(error.to_string()));
    }
}

pub fn reporter() -> (Reporter, Receiver<Happening>) {
    let (tx, rx) = channel();
    (Reporter { tx }, rx)
}

/// The standard test stack: length-prefixed frames carrying UTF-8 strings
pub fn string_chain(max_frame: usize) -> ChainFilterBuilder<Bytes, String> {
    ChainFilterBuilder::<Bytes, Bytes>::new()
        .add(move |_| FrameFilter::new(64, max_frame))
        .add(|_| Utf8Filter)
}

/// A loopback address with a currently free port
pub fn free_port() -> SocketAddr {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    probe.local_addr().expect("probe addr")
}

/// Collect the next `n` received messages, skipping unrelated happenings
pub fn take_received(rx: &Receiver<Happening>, n: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match rx.recv_timeout(WAIT) {
            Ok(Happening::Received(message)) => out.push(message),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                panic!("timed out after {} of {} messages", out.len(), n)
            }
            Err(RecvTimeoutError::Disconnected) => panic!("handler dropped"),
        }
    }
    out
}

/// Wait for the closing notification, skipping data still in flight
pub fn take_closing(rx: &Receiver<Happening>) -> ClosingCause {
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(Happening::Closing(cause)) => return cause,
            Ok(_) => {}
            Err(e) => panic!("no closing notification: {e:?}"),
        }
    }
}

/// Wait for the closed notification, counting how many arrive is the
/// caller's business; this returns on the first
pub fn take_closed(rx: &Receiver<Happening>) {
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(Happening::Closed) => return,
            Ok(_) => {}
            Err(e) => panic!("no close notification: {e:?}"),
        }
    }
}

/// Wait for an error notification and return its rendering
pub fn take_error(rx: &Receiver<Happening>) -> String {
    loop {
        match rx.recv_timeout(WAIT) {
            Ok(Happening::Errored(message)) => return message,
            Ok(_) => {}
            Err(e) => panic!("no error notification: {e:?}"),
        }
    }
}
