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

//! One-shot request futures
//!
//! Requests submitted to an engine thread are answered through a
//! [`RequestFuture`], a single-value handoff backed by a bounded channel.
//! The engine completes the paired [`Promise`] on the owner thread; the
//! caller blocks on `wait` or bounds the wait itself with `wait_timeout`
//! (the core imposes no per-operation timeout).

use crate::error::{MuxError, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// The caller's half of a one-shot request
#[derive(Debug)]
pub struct RequestFuture<T> {
    rx: Receiver<Result<T>>,
}

impl<T> RequestFuture<T> {
    /// Block until the request completes
    ///
    /// A dropped [`Promise`] (the owning thread exited before answering)
    /// surfaces as [`MuxError::ChannelClosed`].
    pub fn wait(self) -> Result<T> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(MuxError::ChannelClosed),
        }
    }

    /// Block until the request completes or the deadline passes
    pub fn wait_timeout(self, timeout: Duration) -> Result<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(MuxError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(MuxError::ChannelClosed),
        }
    }

    /// Take the result if the request has already completed
    pub fn poll(&self) -> Option<Result<T>> {
        self.rx.try_recv().ok()
    }
}

/// The engine's half of a one-shot request
#[derive(Debug)]
pub(crate) struct Promise<T> {
    tx: Sender<Result<T>>,
}

impl<T> Promise<T> {
    /// Create a connected promise/future pair
    pub(crate) fn pair() -> (Promise<T>, RequestFuture<T>) {
        let (tx, rx) = bounded(1);
        (Promise { tx }, RequestFuture { rx })
    }

    /// Complete the request successfully
    pub(crate) fn complete(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    /// Fail the request
    pub(crate) fn fail(self, error: MuxError) {
        let _ = self.tx.send(Err(error));
    }
}
