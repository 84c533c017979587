//! Shared helpers for server integration tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::time::Duration;

use mmo_protocol::config::{ClientConfig, NetworkConfig};
use mmo_protocol::core::command::{Command, Opcode};
use mmo_protocol::protocol::account::AccountIdentity;
use mmo_protocol::protocol::props;
use mmo_protocol::service::Client;
use mmo_protocol::transport::{Inbound, Server, SessionHandle};
use mmo_protocol::utils::crypto::KeyAgent;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub server: Server,
    pub events: mpsc::UnboundedReceiver<Inbound>,
}

/// Start a server on ephemeral ports that forwards every inbound command
pub async fn start(mutate: impl FnOnce(&mut NetworkConfig)) -> Harness {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.server.udp_address = "127.0.0.1:0".into();
        mutate(c);
    });

    let server = Server::new(&config, KeyAgent::generate());
    let (tx, events) = mpsc::unbounded_channel();
    server
        .start(move |_, inbound| {
            let _ = tx.send(inbound);
        })
        .await
        .expect("server should start");

    Harness { server, events }
}

pub fn client_config(server: &Server) -> ClientConfig {
    ClientConfig {
        address: server.local_addr().unwrap().to_string(),
        response_timeout: Duration::from_secs(2),
        ..ClientConfig::default()
    }
}

pub async fn connect(server: &Server) -> Client {
    Client::connect(&client_config(server)).await.expect("client should connect")
}

/// Next inbound command matching `pred`, skipping others
pub async fn next_event(
    events: &mut mpsc::UnboundedReceiver<Inbound>,
    pred: impl Fn(&Inbound) -> bool,
) -> Inbound {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("server dropped callback");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for inbound command")
}

/// Log in with a plain identity and return the server-side handle
pub async fn login(
    client: &mut Client,
    events: &mut mpsc::UnboundedReceiver<Inbound>,
    name: &str,
) -> SessionHandle {
    client
        .login_plain(&AccountIdentity::new(name))
        .await
        .unwrap();
    login_handle(events, name).await
}

pub async fn login_handle(events: &mut mpsc::UnboundedReceiver<Inbound>, name: &str) -> SessionHandle {
    let event = next_event(events, |e| {
        e.opcode() == Opcode::Login && e.command().get_str(props::NAME) == Some(name)
    })
    .await;
    *event.session().expect("login arrives on a session")
}

pub async fn wait_until(what: &str, f: impl Fn() -> bool) {
    let ok = tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ok.is_ok(), "timed out waiting for {what}");
}

pub fn chat(text: &str) -> Command {
    let mut cmd = Command::new(Opcode::Chat);
    cmd.push_str(props::MESSAGE, text, 256).unwrap();
    cmd
}

/// Player update carrying `size` bytes of payload, for throughput tests
pub fn bulk(size: usize) -> Command {
    let mut cmd = Command::new(Opcode::PlayerUpdate);
    cmd.push_bytes(0x0100, vec![0xAB; size]).unwrap();
    cmd
}
