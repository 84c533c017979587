//! Admission control: flooding, idle pruning and the aggregate pause.
//!
//! Passes are driven with `refresh_session_at` and an accounting window long
//! enough that the maintenance task never folds a window on its own.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

mod common;

use std::time::Duration;

use common::*;
use mmo_protocol::config::ClientConfig;
use mmo_protocol::core::command::Opcode;
use mmo_protocol::error::ProtocolError;
use mmo_protocol::protocol::props;
use mmo_protocol::service::Client;
use mmo_protocol::transport::SessionState;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flooding_session_closed() {
    let Harness { server, mut events } = start(|c| {
        c.admission.accounting_window = WINDOW;
        c.admission.average_windows = 1;
        c.admission.max_session_read_average = 1000;
        c.admission.max_total_read_average = 1_000_000;
        c.admission.idle_timeout = Duration::from_secs(600);
    })
    .await;

    let mut noisy = connect(&server).await;
    let mut quiet = connect(&server).await;
    let hn = login(&mut noisy, &mut events, "noisy").await;
    let hq = login(&mut quiet, &mut events, "quiet").await;

    noisy.send(bulk(2000)).await.unwrap();
    next_event(&mut events, |e| {
        e.session() == Some(&hn) && e.opcode() == Opcode::PlayerUpdate
    })
    .await;
    quiet.send(chat("hi")).await.unwrap();
    next_event(&mut events, |e| {
        e.session() == Some(&hq) && e.command().get_str(props::MESSAGE) == Some("hi")
    })
    .await;

    let outcome = server.refresh_session_at(Instant::now() + WINDOW).unwrap();
    assert_eq!(outcome.flooding, 1);
    assert_eq!(outcome.idle, 0);
    assert!(!outcome.admission_paused);

    assert!(matches!(noisy.recv().await, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(server.session_state(&hq), Some(SessionState::Active));
    assert_eq!(server.get_user_count(), 1);
    assert_eq!(server.metrics().snapshot().admission_rejections, 1);

    // the flooding session leaves once its writer finishes
    wait_until("flooding session pruned", || server.session_state(&hn).is_none()).await;

    // a second pass with nothing changed removes nothing
    let at = Instant::now() + WINDOW;
    server.refresh_session_at(at).unwrap();
    let again = server.refresh_session_at(at).unwrap();
    assert_eq!((again.pruned, again.flooding, again.idle), (0, 0, 0));
    assert_eq!(server.get_user_count(), 1);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_after_quiet_history_closed_at_default_depth() {
    let Harness { server, mut events } = start(|c| {
        c.admission.accounting_window = WINDOW;
        c.admission.max_session_read_average = 1000;
        c.admission.max_total_read_average = 1_000_000;
        c.admission.idle_timeout = Duration::from_secs(600);
    })
    .await;

    let mut steady = connect(&server).await;
    let hs = login(&mut steady, &mut events, "steady").await;

    // three quiet windows fill the history
    let t0 = Instant::now();
    for n in 1..=3 {
        let outcome = server.refresh_session_at(t0 + WINDOW * n).unwrap();
        assert_eq!(outcome.flooding, 0);
    }
    assert_eq!(server.session_state(&hs), Some(SessionState::Active));

    steady.send(bulk(2500)).await.unwrap();
    next_event(&mut events, |e| {
        e.session() == Some(&hs) && e.opcode() == Opcode::PlayerUpdate
    })
    .await;

    // the four-window average stays under the limit, the burst does not
    let outcome = server.refresh_session_at(t0 + WINDOW * 4).unwrap();
    assert!(server.session_read_average(&hs).map_or(true, |avg| avg < 1000));
    assert_eq!(outcome.flooding, 1);
    assert!(matches!(steady.recv().await, Err(ProtocolError::ConnectionClosed)));
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_idle_session_pruned() {
    let Harness { server, mut events } = start(|c| {
        c.admission.accounting_window = WINDOW;
        c.admission.average_windows = 4;
        c.admission.min_session_read_average = 5;
        c.admission.idle_timeout = WINDOW * 2;
    })
    .await;

    let mut silent = connect(&server).await;
    let mut talker = connect(&server).await;
    let ht = login(&mut talker, &mut events, "talker").await;
    talker.send(bulk(200)).await.unwrap();
    next_event(&mut events, |e| e.session() == Some(&ht) && e.opcode() == Opcode::PlayerUpdate).await;

    // one window in: quiet, but not for long enough
    let t0 = Instant::now();
    let early = server.refresh_session_at(t0 + WINDOW).unwrap();
    assert_eq!(early.idle, 0);
    assert_eq!(server.get_user_count(), 2);

    let late = server.refresh_session_at(t0 + WINDOW * 3).unwrap();
    assert_eq!(late.idle, 1);
    assert_eq!(late.flooding, 0);

    assert!(matches!(silent.recv().await, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(server.session_state(&ht), Some(SessionState::Active));
    assert_eq!(server.get_user_count(), 1);
    server.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_aggregate_limit_pauses_and_resumes_accepts() {
    let Harness { server, mut events } = start(|c| {
        c.admission.accounting_window = WINDOW;
        c.admission.average_windows = 1;
        c.admission.max_session_read_average = 100_000;
        c.admission.max_total_read_average = 1500;
        c.admission.idle_timeout = Duration::from_secs(600);
    })
    .await;

    let mut a = connect(&server).await;
    let mut b = connect(&server).await;
    let ha = login(&mut a, &mut events, "alpha").await;
    let hb = login(&mut b, &mut events, "bravo").await;
    for (client, handle) in [(&mut a, ha), (&mut b, hb)] {
        client.send(bulk(1000)).await.unwrap();
        next_event(&mut events, |e| e.session() == Some(&handle) && e.opcode() == Opcode::PlayerUpdate).await;
    }

    let t0 = Instant::now();
    let outcome = server.refresh_session_at(t0 + WINDOW).unwrap();
    assert!(outcome.admission_paused);
    assert!(outcome.aggregate_read_average > 1500);
    assert!(!server.is_accepting());
    assert!(server.status().unwrap().admission_paused);
    assert!(server.session_read_average(&ha).unwrap() > 1000);

    // established sessions keep working
    assert_eq!(server.get_user_count(), 2);
    a.send(chat("still reading")).await.unwrap();
    next_event(&mut events, |e| e.command().get_str(props::MESSAGE) == Some("still reading")).await;

    // a new connection gets no hello while paused
    let impatient = ClientConfig {
        response_timeout: Duration::from_millis(300),
        ..client_config(&server)
    };
    assert!(matches!(
        Client::connect(&impatient).await,
        Err(ProtocolError::Timeout)
    ));
    assert_eq!(server.get_user_count(), 2);

    // no traffic for a window: aggregate drops and accepts resume
    let calm = server.refresh_session_at(t0 + WINDOW * 3).unwrap();
    assert!(!calm.admission_paused);
    assert_eq!(calm.aggregate_read_average, 0);
    assert!(server.is_accepting());

    let mut c = connect(&server).await;
    login(&mut c, &mut events, "charl").await;
    wait_until("three active users", || server.get_user_count() == 3).await;
    server.stop();
}

#[tokio::test]
async fn test_threshold_setters_apply_to_next_pass() {
    let Harness { server, mut events } = start(|c| {
        c.admission.accounting_window = WINDOW;
        c.admission.average_windows = 1;
        c.admission.idle_timeout = Duration::from_secs(600);
    })
    .await;

    let mut a = connect(&server).await;
    let ha = login(&mut a, &mut events, "alpha").await;
    a.send(bulk(500)).await.unwrap();
    next_event(&mut events, |e| e.session() == Some(&ha) && e.opcode() == Opcode::PlayerUpdate).await;

    server.set_max_session_read_average(100);
    assert_eq!(server.session_read_average_limit(), 100);

    let outcome = server.refresh_session_at(Instant::now() + WINDOW).unwrap();
    assert_eq!(outcome.flooding, 1);
    server.stop();
}
