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

//! Application callback surface
//!
//! Every callback runs on the connection's owner thread, single-threaded
//! with respect to that connection: no two callbacks for the same
//! connection ever overlap, and `on_receive` delivers batches in network
//! order.

use crate::error::MuxError;
use crate::filter::MessageQueue;
use crate::types::ClosingCause;

/// Event handler for one managed connection
///
/// `T` is the application-side message type produced by the top of the
/// connection's filter chain. All methods except [`on_receive`] have
/// default implementations that do nothing.
///
/// [`on_receive`]: ConnectionHandler::on_receive
///
/// # Example
///
/// ```
/// use muxio::{ConnectionHandler, MessageQueue};
///
/// struct Printer;
///
/// impl ConnectionHandler<String> for Printer {
///     fn on_receive(&mut self, inbound: &mut MessageQueue<String>) {
///         while let Some(line) = inbound.pop() {
///             println!("received: {line}");
///         }
///     }
/// }
/// ```
pub trait ConnectionHandler<T>: Send + 'static {
    /// Called once, after the filter chain has been constructed and the
    /// connection attached to a live channel
    fn on_bind(&mut self, _inbound: &mut MessageQueue<T>) {}

    /// Called for each nonempty inbound batch
    fn on_receive(&mut self, inbound: &mut MessageQueue<T>);

    /// Called once when a terminal cause is observed, with any inbound
    /// messages still pending delivery
    fn on_closing(&mut self, _cause: ClosingCause, _pending: &mut MessageQueue<T>) {}

    /// Called once, after the channel has been closed and deregistered
    fn on_close(&mut self) {}

    /// Called when the connection's error slot is first set
    ///
    /// `pending` is whatever the read buffer still held when the error was
    /// captured.
    fn on_error(&mut self, _error: &MuxError, _pending: &[u8]) {}
}
