//! End-to-end session scenarios over real TCP connections

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::*;
use mmo_protocol::config::ClientConfig;
use mmo_protocol::core::command::{Command, Opcode};
use mmo_protocol::error::ProtocolError;
use mmo_protocol::protocol::account::AccountIdentity;
use mmo_protocol::protocol::{handshake, props};
use mmo_protocol::service::Client;
use mmo_protocol::transport::{Inbound, SessionState};
use mmo_protocol::utils::crypto::KeyAgent;

/// Raw frame with an arbitrary opcode and body
fn raw_frame(opcode: u16, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((2 + body.len()) as u32).to_be_bytes());
    out.extend_from_slice(&opcode.to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_logins_then_one_leaves() {
    let Harness { server, mut events } = start(|_| {}).await;

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    let mut c = connect(&server).await;
    login(&mut a, &mut events, "alice").await;
    login(&mut b, &mut events, "bobby").await;
    login(&mut c, &mut events, "carol").await;

    assert_eq!(server.get_user_count(), 3);

    b.close().await.unwrap();
    wait_until("user count to drop", || server.get_user_count() == 2).await;

    // pruned on the next cycle once the writer has finished
    wait_until("closed session to be pruned", || {
        server.refresh_session().unwrap();
        server.status().unwrap().sessions == 2
    })
    .await;
    assert_eq!(server.get_user_count(), 2);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_others_skips_origin() {
    let Harness { server, mut events } = start(|_| {}).await;

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    let mut c = connect(&server).await;
    let ha = login(&mut a, &mut events, "alice").await;
    login(&mut b, &mut events, "bobby").await;
    login(&mut c, &mut events, "carol").await;

    let delivered = server.send_others(&chat("hello"), &ha).unwrap();
    assert_eq!(delivered, 2);

    for client in [&mut b, &mut c] {
        let got = client.recv().await.unwrap();
        assert_eq!(got.get_str(props::MESSAGE), Some("hello"));
    }
    let nothing = tokio::time::timeout(Duration::from_millis(200), a.recv()).await;
    assert!(nothing.is_err(), "origin must not receive its own broadcast");

    assert_eq!(server.send_all(&chat("all")).unwrap(), 3);
    assert_eq!(a.recv().await.unwrap().get_str(props::MESSAGE), Some("all"));
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_session_order_preserved() {
    let Harness { server, mut events } = start(|_| {}).await;
    let mut a = connect(&server).await;
    let ha = login(&mut a, &mut events, "alice").await;

    for i in 0..50 {
        server.send(&ha, &chat(&format!("m{i}"))).unwrap();
    }
    for i in 0..50 {
        let got = a.recv().await.unwrap();
        assert_eq!(got.get_str(props::MESSAGE), Some(format!("m{i}").as_str()));
    }

    for i in 0..20 {
        a.send(chat(&format!("c{i}"))).await.unwrap();
    }
    for i in 0..20 {
        let event = next_event(&mut events, |e| e.opcode() == Opcode::Chat).await;
        assert_eq!(
            event.command().get_str(props::MESSAGE),
            Some(format!("c{i}").as_str())
        );
    }
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sealed_login_binds_identity() {
    let Harness { server, mut events } = start(|c| c.server.require_sealed_login = true).await;
    let mut a = connect(&server).await;
    assert_eq!(a.server_key(), &server.public_key());

    let identity = AccountIdentity::new("alice")
        .with_trip("tr1p")
        .with_model("chara/alice")
        .with_udp_port(40100);
    a.login(&identity).await.unwrap();

    let handle = login_handle(&mut events, "alice").await;
    assert_eq!(server.account(&handle), Some(identity));
    assert_eq!(server.metrics().snapshot().handshakes_success, 1);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_foreign_ciphertext_closes_only_that_session() {
    let Harness { server, mut events } = start(|_| {}).await;

    let mut good = connect(&server).await;
    let hg = login(&mut good, &mut events, "alice").await;

    let mut bad = connect(&server).await;
    let wrong_key = KeyAgent::generate().public_key();
    let login = handshake::seal_login(&wrong_key, &AccountIdentity::new("mallory")).unwrap();
    bad.send(login).await.unwrap();

    // the server hangs up on the bad client
    assert!(matches!(bad.recv().await, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(server.metrics().snapshot().handshakes_failed, 1);

    // the good session is untouched
    assert_eq!(server.session_state(&hg), Some(SessionState::Active));
    server.send(&hg, &chat("still here")).unwrap();
    assert_eq!(
        good.recv().await.unwrap().get_str(props::MESSAGE),
        Some("still here")
    );
    assert_eq!(server.get_user_count(), 1);

    // no login was delivered for the failed session
    while let Ok(event) = events.try_recv() {
        if event.opcode() == Opcode::Login {
            assert_ne!(event.command().get_str(props::NAME), Some("mallory"));
        }
    }
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unsealed_login_refused_by_policy() {
    let Harness { server, .. } = start(|c| c.server.require_sealed_login = true).await;
    let mut a = connect(&server).await;
    a.login_plain(&AccountIdentity::new("alice")).await.unwrap();
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_opcodes_dropped_until_tolerance() {
    let Harness { server, mut events } =
        start(|c| c.server.max_unknown_opcodes = 2).await;
    let mut a = connect(&server).await;
    let ha = login(&mut a, &mut events, "alice").await;

    a.send_raw(&raw_frame(0x7777, &[])).await.unwrap();
    a.send_raw(&raw_frame(0x7778, &[1, 2, 3])).await.unwrap();
    a.send(chat("after unknown")).await.unwrap();

    let event = next_event(&mut events, |e| e.opcode() == Opcode::Chat).await;
    assert_eq!(event.command().get_str(props::MESSAGE), Some("after unknown"));
    assert_eq!(server.session_state(&ha), Some(SessionState::Active));

    // third one crosses the tolerance
    a.send_raw(&raw_frame(0x7779, &[])).await.unwrap();
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(server.metrics().snapshot().unknown_opcodes, 3);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_malformed_properties_close_after_tolerance() {
    let Harness { server, mut events } =
        start(|c| c.server.max_protocol_violations = 1).await;
    let mut a = connect(&server).await;
    login(&mut a, &mut events, "alice").await;

    // property declares 200 value bytes, carries 1
    let malformed = [0x00, 0x30, 0x10, 0x00, 0xC8, b'x'];
    a.send_raw(&raw_frame(Opcode::Chat.as_u16(), &malformed)).await.unwrap();
    a.send(chat("survived one")).await.unwrap();
    let event = next_event(&mut events, |e| e.opcode() == Opcode::Chat).await;
    assert_eq!(event.command().get_str(props::MESSAGE), Some("survived one"));

    a.send_raw(&raw_frame(Opcode::Chat.as_u16(), &malformed)).await.unwrap();
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(server.metrics().snapshot().protocol_errors, 2);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_frame_closes_session() {
    let Harness { server, mut events } = start(|c| c.server.max_frame_size = 1024).await;
    let mut a = connect(&server).await;
    login(&mut a, &mut events, "alice").await;

    a.send_raw(&(1_000_000u32).to_be_bytes()).await.unwrap();
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_to_closed_session_unavailable() {
    let Harness { server, mut events } = start(|_| {}).await;
    let mut a = connect(&server).await;
    let ha = login(&mut a, &mut events, "alice").await;

    server.close_session(&ha).unwrap();
    assert!(matches!(
        server.send(&ha, &chat("late")),
        Err(ProtocolError::SessionUnavailable(_))
    ));
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_drains_and_refuses_attach() {
    let Harness { server, mut events } = start(|_| {}).await;
    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    login(&mut a, &mut events, "alice").await;
    login(&mut b, &mut events, "bobby").await;

    server.send_all(&chat("bye")).unwrap();
    server.stop();

    // queued writes still arrive before the hang-up
    assert_eq!(a.recv().await.unwrap().get_str(props::MESSAGE), Some("bye"));
    assert!(matches!(a.recv().await, Err(ProtocolError::ConnectionClosed)));

    server.drain(Duration::from_secs(5)).await.unwrap();
    assert!(server.is_empty());
    assert_eq!(server.get_user_count(), 0);

    let (stream, _peer) = tokio::io::duplex(64);
    assert!(matches!(
        server.attach(stream, "127.0.0.1:1".parse().unwrap()),
        Err(ProtocolError::NotStarted)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_attach_racing_stop_leaves_nothing_behind() {
    let Harness { server, .. } = start(|c| c.server.max_connections = 1_000).await;

    let attacher = server.clone();
    let attaching = tokio::task::spawn_blocking(move || {
        let mut peers = Vec::new();
        for port in 1..=500u16 {
            let (stream, peer) = tokio::io::duplex(256);
            match attacher.attach(stream, SocketAddr::from(([127, 0, 0, 1], port))) {
                Ok(_) => peers.push(peer),
                Err(ProtocolError::NotStarted) => break,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
        peers
    });

    tokio::time::sleep(Duration::from_millis(1)).await;
    server.stop();
    let _peers = attaching.await.unwrap();

    // every attached session either got refused or reaches Closed
    server.drain(Duration::from_secs(5)).await.unwrap();
    assert!(server.is_empty());
}

#[tokio::test]
async fn test_connect_refused_is_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let config = ClientConfig {
        address,
        ..ClientConfig::default()
    };
    assert!(matches!(
        Client::connect(&config).await,
        Err(ProtocolError::TransportError(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_connections_enforced() {
    let Harness { server, .. } = start(|c| c.server.max_connections = 1).await;
    let _a = connect(&server).await;

    let (stream, _peer) = tokio::io::duplex(64);
    assert!(matches!(
        server.attach(stream, "127.0.0.1:2".parse().unwrap()),
        Err(ProtocolError::AdmissionRejected(_))
    ));
    assert_eq!(server.metrics().snapshot().connections_refused, 1);
    server.stop();
}

#[tokio::test]
async fn test_attach_in_memory_stream() {
    let Harness { server, mut events } = start(|_| {}).await;

    let (server_side, client_side) = tokio::io::duplex(4096);
    let handle = server
        .attach(server_side, "10.1.2.3:4567".parse().unwrap())
        .unwrap();
    assert_eq!(handle.peer().port(), 4567);

    let mut client = Client::from_stream(client_side, client_config(&server))
        .await
        .unwrap();
    client
        .login(&AccountIdentity::new("duplex"))
        .await
        .unwrap();

    let event = next_event(&mut events, |e| e.opcode() == Opcode::Login).await;
    match event {
        Inbound::Session { handle: h, command } => {
            assert_eq!(h, handle);
            assert_eq!(command.get_str(props::NAME), Some("duplex"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let status: serde_json::Value = serde_json::from_str(&server.get_status_json().unwrap()).unwrap();
    assert_eq!(status["user_count"], 1);
    assert_eq!(status["authenticated"], 1);

    let reply = Command::new(Opcode::LoginAccepted);
    server.send(&handle, &reply).unwrap();
    assert_eq!(client.recv().await.unwrap().opcode(), Opcode::LoginAccepted);
    server.stop();
}
