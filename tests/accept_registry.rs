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

//! Shared listening sockets and accept lifecycle

mod common;

use common::{free_port, reporter, string_chain, take_closed, WAIT};
use muxio::{ConnectionManager, ManagerConfig, MuxError};

/// Two accepts on one address share one listening socket; the address stays
/// bound until the last pending accept leaves
#[test]
fn test_accept_coalescing() {
    let manager = ConnectionManager::new(ManagerConfig::new("coalesce")).unwrap();
    let addr = free_port();

    let (first_handler, first_rx) = reporter();
    let (second_handler, second_rx) = reporter();

    let first = manager
        .new_connection("first", string_chain(1 << 16), first_handler)
        .unwrap();
    let second = manager
        .new_connection("second", string_chain(1 << 16), second_handler)
        .unwrap();

    let _first_up = first.accept(addr);
    let _second_up = second.accept(addr);

    assert_eq!(manager.bound_addresses().unwrap(), vec![addr]);

    first.close();
    take_closed(&first_rx);
    assert_eq!(manager.bound_addresses().unwrap(), vec![addr]);

    second.close();
    take_closed(&second_rx);
    assert!(manager.bound_addresses().unwrap().is_empty());

    manager.close().unwrap();
}

/// Wildcard ports are rejected at registration
#[test]
fn test_wildcard_port_rejected() {
    let manager = ConnectionManager::new(ManagerConfig::new("wildcard")).unwrap();

    let (handler, _rx) = reporter();
    let conn = manager
        .new_connection("wild", string_chain(1 << 16), handler)
        .unwrap();

    let err = conn
        .accept("127.0.0.1:0".parse().unwrap())
        .wait_timeout(WAIT)
        .unwrap_err();
    assert!(err.to_string().contains("wildcard"));

    manager.close().unwrap();
}

/// A connect with nobody listening fails the init future
#[test]
fn test_connect_refused() {
    let manager = ConnectionManager::new(ManagerConfig::new("refused")).unwrap();

    let (handler, rx) = reporter();
    let conn = manager
        .new_connection("nobody-home", string_chain(1 << 16), handler)
        .unwrap();

    let err = conn.connect(free_port()).wait_timeout(WAIT).unwrap_err();
    assert!(err.is_fatal());
    let _ = common::take_error(&rx);
    take_closed(&rx);

    manager.close().unwrap();
}

/// Engine shutdown errors pending accepts with the cancellation cause
#[test]
fn test_shutdown_cancels_pending_accepts() {
    let manager = ConnectionManager::new(ManagerConfig::new("cancel")).unwrap();
    let addr = free_port();

    let (handler, rx) = reporter();
    let conn = manager
        .new_connection("pending", string_chain(1 << 16), handler)
        .unwrap();
    let pending = conn.accept(addr);

    assert_eq!(manager.bound_addresses().unwrap(), vec![addr]);
    manager.close().unwrap();

    match pending.wait_timeout(WAIT) {
        Err(e) => assert!(e.is_cancellation(), "unexpected cause: {e}"),
        Ok(addr) => panic!("pending accept completed at {addr}"),
    }
    take_closed(&rx);

    // The proxy fails fast once the engine is gone.
    assert!(matches!(
        conn.send("late".to_string()),
        Err(MuxError::ConnectionClosed)
    ));
}

/// A released address can be bound again by a later accept
#[test]
fn test_address_reusable_after_release() {
    let manager = ConnectionManager::new(ManagerConfig::new("reuse")).unwrap();
    let addr = free_port();

    let (first_handler, first_rx) = reporter();
    let first = manager
        .new_connection("first", string_chain(1 << 16), first_handler)
        .unwrap();
    let _ = first.accept(addr);
    assert_eq!(manager.bound_addresses().unwrap(), vec![addr]);

    first.close();
    take_closed(&first_rx);
    assert!(manager.bound_addresses().unwrap().is_empty());

    let (second_handler, _second_rx) = reporter();
    let second = manager
        .new_connection("second", string_chain(1 << 16), second_handler)
        .unwrap();
    let _ = second.accept(addr);
    assert_eq!(manager.bound_addresses().unwrap(), vec![addr]);

    manager.close().unwrap();
}
