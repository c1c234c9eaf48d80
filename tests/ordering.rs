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

//! Delivery-order guarantees under separate sender and receiver managers

mod common;

use common::{free_port, reporter, string_chain, take_received, WAIT};
use muxio::{ConnectionManager, ManagerConfig};
use std::time::{SystemTime, UNIX_EPOCH};

const MESSAGE_LENGTH: usize = 1024;
const MESSAGE_COUNT: usize = 100;

fn arbitrary_start() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 % 4096)
        .unwrap_or(1)
}

fn sequenced(seq: u64) -> String {
    let header = format!("{seq:016}");
    let mut message = String::with_capacity(MESSAGE_LENGTH);
    message.push_str(&header);
    while message.len() < MESSAGE_LENGTH {
        message.push('x');
    }
    message
}

/// A sequenced stream of fixed-size messages arrives monotonically, with
/// exact payloads
#[test]
fn test_sequenced_stream() {
    let receiver_manager = ConnectionManager::new(ManagerConfig::new("rcm")).unwrap();
    let sender_manager = ConnectionManager::new(ManagerConfig::new("scm")).unwrap();
    let addr = free_port();

    let (receiver_handler, receiver_rx) = reporter();
    let (sender_handler, _sender_rx) = reporter();

    let receiver = receiver_manager
        .new_connection("receiver", string_chain(1 << 16), receiver_handler)
        .unwrap();
    let sender = sender_manager
        .new_connection("sender", string_chain(1 << 16), sender_handler)
        .unwrap();

    let receiver_up = receiver.accept(addr);
    sender.connect(addr).wait_timeout(WAIT).unwrap();
    receiver_up.wait_timeout(WAIT).unwrap();

    let start = arbitrary_start();
    for i in 0..MESSAGE_COUNT as u64 {
        sender.send(sequenced(start + i)).unwrap();
    }

    let received = take_received(&receiver_rx, MESSAGE_COUNT);
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message.len(), MESSAGE_LENGTH);
        assert_eq!(message, &sequenced(start + i as u64));
    }

    sender_manager.close().unwrap();
    receiver_manager.close().unwrap();
}

/// Messages staged before the connect completes flush in submission order
#[test]
fn test_send_before_connect() {
    let receiver_manager = ConnectionManager::new(ManagerConfig::new("early-rcm")).unwrap();
    let sender_manager = ConnectionManager::new(ManagerConfig::new("early-scm")).unwrap();
    let addr = free_port();

    let (receiver_handler, receiver_rx) = reporter();
    let (sender_handler, _sender_rx) = reporter();

    let receiver = receiver_manager
        .new_connection("receiver", string_chain(1 << 16), receiver_handler)
        .unwrap();
    let sender = sender_manager
        .new_connection("sender", string_chain(1 << 16), sender_handler)
        .unwrap();

    let receiver_up = receiver.accept(addr);

    // Stage everything while the sender is still virgin.
    for i in 0..50 {
        sender.send(format!("staged-{i:02}")).unwrap();
    }

    sender.connect(addr).wait_timeout(WAIT).unwrap();
    receiver_up.wait_timeout(WAIT).unwrap();

    let received = take_received(&receiver_rx, 50);
    for (i, message) in received.iter().enumerate() {
        assert_eq!(message, &format!("staged-{i:02}"));
    }

    sender_manager.close().unwrap();
    receiver_manager.close().unwrap();
}

/// Sends interleaved around the init future still arrive in order
#[test]
fn test_send_straddling_connect() {
    let receiver_manager = ConnectionManager::new(ManagerConfig::new("straddle-rcm")).unwrap();
    let sender_manager = ConnectionManager::new(ManagerConfig::new("straddle-scm")).unwrap();
    let addr = free_port();

    let (receiver_handler, receiver_rx) = reporter();
    let (sender_handler, _sender_rx) = reporter();

    let receiver = receiver_manager
        .new_connection("receiver", string_chain(1 << 16), receiver_handler)
        .unwrap();
    let sender = sender_manager
        .new_connection("sender", string_chain(1 << 16), sender_handler)
        .unwrap();

    let receiver_up = receiver.accept(addr);

    sender.send("before".to_string()).unwrap();
    let sender_up = sender.connect(addr);
    sender.send("during".to_string()).unwrap();
    sender_up.wait_timeout(WAIT).unwrap();
    sender.send("after".to_string()).unwrap();
    receiver_up.wait_timeout(WAIT).unwrap();

    assert_eq!(
        take_received(&receiver_rx, 3),
        vec!["before", "during", "after"]
    );

    sender_manager.close().unwrap();
    receiver_manager.close().unwrap();
}
