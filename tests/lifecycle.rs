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

//! Graceful-close and error-close semantics

mod common;

use common::{
    free_port, reporter, string_chain, take_closed, take_closing, take_error, take_received,
    Happening, WAIT,
};
use muxio::{ClosingCause, ConnectionManager, ManagerConfig, MuxError};
use std::io::Write;
use std::time::Duration;

/// An unexpected peer disconnect surfaces as exactly one end-of-stream
/// closing, then one close; sends afterwards fail fast
#[test]
fn test_peer_disconnect() {
    let manager = ConnectionManager::new(ManagerConfig::new("eos")).unwrap();
    let addr = free_port();

    let (server_handler, server_rx) = reporter();
    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let server_up = server.accept(addr);

    let peer = std::net::TcpStream::connect(addr).unwrap();
    server_up.wait_timeout(WAIT).unwrap();
    drop(peer);

    assert_eq!(take_closing(&server_rx), ClosingCause::EndOfStream);
    take_closed(&server_rx);

    // No further notifications of any kind.
    assert!(server_rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert!(matches!(
        server.send("too late".to_string()),
        Err(MuxError::ConnectionClosed)
    ));

    manager.close().unwrap();
}

/// N close calls collapse to one closing and one close notification
#[test]
fn test_idempotent_close() {
    let manager = ConnectionManager::new(ManagerConfig::new("idempotent")).unwrap();
    let addr = free_port();

    let (server_handler, _server_rx) = reporter();
    let (client_handler, client_rx) = reporter();

    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let client = manager
        .new_connection("client", string_chain(1 << 16), client_handler)
        .unwrap();

    let server_up = server.accept(addr);
    client.connect(addr).wait_timeout(WAIT).unwrap();
    server_up.wait_timeout(WAIT).unwrap();

    client.close();
    client.close();
    client.close();

    assert_eq!(take_closing(&client_rx), ClosingCause::User);
    take_closed(&client_rx);

    let mut extra_closes = 0;
    while let Ok(happening) = client_rx.recv_timeout(Duration::from_millis(200)) {
        if matches!(happening, Happening::Closed | Happening::Closing(_)) {
            extra_closes += 1;
        }
    }
    assert_eq!(extra_closes, 0);

    manager.close().unwrap();
}

/// An oversize outbound frame is an error close for the sender only
#[test]
fn test_framing_overflow_is_fatal_to_sender() {
    let manager = ConnectionManager::new(ManagerConfig::new("overflow")).unwrap();
    let addr = free_port();

    let (server_handler, server_rx) = reporter();
    let (client_handler, client_rx) = reporter();

    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let client = manager
        .new_connection("client", string_chain(256), client_handler)
        .unwrap();

    let server_up = server.accept(addr);
    client.connect(addr).wait_timeout(WAIT).unwrap();
    server_up.wait_timeout(WAIT).unwrap();

    // An exact-maximum frame passes.
    client.send("x".repeat(256)).unwrap();
    assert_eq!(take_received(&server_rx, 1), vec!["x".repeat(256)]);

    // One byte more is a framing error.
    client.send("y".repeat(257)).unwrap();
    assert!(take_error(&client_rx).contains("exceeds"));
    assert_eq!(take_closing(&client_rx), ClosingCause::Error);
    take_closed(&client_rx);

    manager.close().unwrap();
}

/// A user-raised error closes immediately and surfaces through the handler
#[test]
fn test_user_error_close() {
    let manager = ConnectionManager::new(ManagerConfig::new("user-error")).unwrap();
    let addr = free_port();

    let (server_handler, _server_rx) = reporter();
    let (client_handler, client_rx) = reporter();

    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let client = manager
        .new_connection("client", string_chain(1 << 16), client_handler)
        .unwrap();

    let server_up = server.accept(addr);
    client.connect(addr).wait_timeout(WAIT).unwrap();
    server_up.wait_timeout(WAIT).unwrap();

    client.error(MuxError::InvalidConfig("operator said no".to_string()));

    assert!(take_error(&client_rx).contains("operator said no"));
    assert_eq!(take_closing(&client_rx), ClosingCause::Error);
    take_closed(&client_rx);

    manager.close().unwrap();
}

/// Execute closures run on the connection's owner thread
#[test]
fn test_execute_on_owner_thread() {
    let manager = ConnectionManager::new(ManagerConfig::new("execute")).unwrap();
    let addr = free_port();

    let (server_handler, _server_rx) = reporter();
    let (client_handler, _client_rx) = reporter();

    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let client = manager
        .new_connection("client", string_chain(1 << 16), client_handler)
        .unwrap();

    let server_up = server.accept(addr);
    client.connect(addr).wait_timeout(WAIT).unwrap();
    server_up.wait_timeout(WAIT).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    client
        .execute(move || {
            let _ = tx.send(std::thread::current().name().map(str::to_string));
        })
        .unwrap();

    let thread_name = rx.recv_timeout(WAIT).unwrap();
    assert!(thread_name.unwrap_or_default().contains("/io-"));

    manager.close().unwrap();
}

/// A half-closed peer still receives the deferred writes queued before the
/// end-of-stream was observed
#[test]
fn test_eos_flushes_deferred_writes() {
    let manager = ConnectionManager::new(ManagerConfig::new("halfclose")).unwrap();
    let addr = free_port();

    let (server_handler, server_rx) = reporter();
    let server = manager
        .new_connection("server", string_chain(1 << 16), server_handler)
        .unwrap();
    let server_up = server.accept(addr);

    let mut peer = std::net::TcpStream::connect(addr).unwrap();
    server_up.wait_timeout(WAIT).unwrap();

    // Queue a reply, then have the peer half-close its write side.
    server.send("parting-gift".to_string()).unwrap();
    peer.flush().unwrap();
    peer.shutdown(std::net::Shutdown::Write).unwrap();

    assert_eq!(take_closing(&server_rx), ClosingCause::EndOfStream);
    take_closed(&server_rx);

    // The peer can still read the frame the server queued.
    use std::io::Read;
    peer.set_read_timeout(Some(WAIT)).unwrap();
    let mut image = Vec::new();
    peer.read_to_end(&mut image).unwrap();
    let expected = b"parting-gift";
    assert_eq!(&image[..4], &(expected.len() as u32).to_be_bytes());
    assert_eq!(&image[4..], expected);

    manager.close().unwrap();
}
