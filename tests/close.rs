//! Teardown: drain, FIN, release.

mod common;

use std::time::Duration;

use common::*;
use stcp::packet::{flags, Packet};
use stcp::{Config, Connection, StcpError};

#[tokio::test(start_paused = true)]
async fn fin_is_acked_and_channel_released() {
    let (peer, log) = ScriptedPeer::new(ReceiverModel::new(2000).into_responder());
    let mut conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, test_config())
        .await
        .unwrap();
    conn.send(&[7u8; 2500]).await.unwrap();
    let next = conn.send_seq();

    conn.close().await.expect("close");

    let log = log.lock().unwrap();
    let fins: Vec<&Packet> = log.sent.iter().filter(|p| p.header.is_fin()).collect();
    assert_eq!(fins.len(), 1);
    assert_eq!(fins[0].header.seq, next);
    assert!(fins[0].payload.is_empty());
    assert!(log.released);
}

#[tokio::test(start_paused = true)]
async fn close_right_after_open_sends_fin_at_isn_plus_one() {
    let (peer, log) = ScriptedPeer::new(ReceiverModel::new(2000).into_responder());
    let conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, test_config())
        .await
        .unwrap();
    let isn = conn.initial_seq();

    conn.close().await.expect("close");

    let log = log.lock().unwrap();
    let fin = log.sent.last().unwrap();
    assert_eq!(fin.header.flags, flags::FIN | flags::ACK);
    assert_eq!(fin.header.seq, isn.wrapping_add(1));
    assert_eq!(fin.header.ack, PEER_ISN + 1);
}

#[tokio::test(start_paused = true)]
async fn lost_fin_ack_is_recovered_by_retransmission() {
    let mut inner = ReceiverModel::new(2000).into_responder();
    let mut fins = 0;
    let peer_fn = responder(move |pkt| {
        if pkt.header.is_fin() {
            fins += 1;
            if fins == 1 {
                return vec![];
            }
        }
        inner(pkt)
    });
    let (peer, log) = ScriptedPeer::new(peer_fn);
    let conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, test_config())
        .await
        .unwrap();
    let start = tokio::time::Instant::now();

    conn.close().await.expect("close");

    assert_eq!(start.elapsed(), test_config().initial_rto);
    let log = log.lock().unwrap();
    assert_eq!(log.count_flag(flags::FIN), 2);
    assert!(log.released);
}

#[tokio::test(start_paused = true)]
async fn unacked_fin_fails_strict_close_but_still_releases() {
    let mut model = ReceiverModel::new(2000);
    model.ignore_fin = true;
    let (peer, log) = ScriptedPeer::new(model.into_responder());
    let cfg = Config {
        max_retries: 2,
        ..test_config()
    };
    let conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, cfg)
        .await
        .unwrap();
    let start = tokio::time::Instant::now();

    let result = conn.close().await;

    assert!(matches!(result, Err(StcpError::FinNotAcked)));
    assert_eq!(start.elapsed(), Duration::from_millis(150 + 300 + 600));
    let log = log.lock().unwrap();
    assert_eq!(log.count_flag(flags::FIN), 3);
    assert!(log.released);
}

#[tokio::test(start_paused = true)]
async fn unacked_fin_is_tolerated_by_lenient_close() {
    let mut model = ReceiverModel::new(2000);
    model.ignore_fin = true;
    let (peer, log) = ScriptedPeer::new(model.into_responder());
    let cfg = Config {
        max_retries: 1,
        strict_close: false,
        ..test_config()
    };
    let conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, cfg)
        .await
        .unwrap();

    conn.close().await.expect("lenient close");

    assert!(log.lock().unwrap().released);
}

#[tokio::test(start_paused = true)]
async fn peer_fin_during_fin_wait_is_acknowledged() {
    let mut model = ReceiverModel::new(2000);
    model.fin_ack = true;
    let (peer, log) = ScriptedPeer::new(model.into_responder());
    let conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, test_config())
        .await
        .unwrap();

    conn.close().await.expect("close");

    let log = log.lock().unwrap();
    let last = log.sent.last().unwrap();
    assert_eq!(last.header.flags, flags::ACK);
    assert_eq!(last.header.ack, PEER_ISN + 2, "peer FIN consumes one number");
}

#[tokio::test(start_paused = true)]
async fn close_after_abort_reports_bad_state_and_releases() {
    let (peer, log) = ScriptedPeer::new(ReceiverModel::new(2000).into_responder());
    let mut conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, test_config())
        .await
        .unwrap();
    log.lock().unwrap().fail_recv = true;
    assert!(conn.send(b"doomed").await.is_err());

    let result = conn.close().await;

    assert!(matches!(result, Err(StcpError::BadState(_))));
    assert!(log.lock().unwrap().released);
}

#[tokio::test(start_paused = true)]
async fn close_waits_for_data_before_fin() {
    // Every data segment is lost once; the FIN must still follow the data.
    let mut model = ReceiverModel::new(3000);
    let cfg = Config {
        isn: Some(0),
        ..test_config()
    };
    for seq in [1, 1001, 2001] {
        model.drop_first.insert(seq);
    }
    let received = std::sync::Arc::clone(&model.received);
    let (peer, log) = ScriptedPeer::new(model.into_responder());
    let mut conn = Connection::open_with(peer, LOCAL_PORT, REMOTE_PORT, cfg)
        .await
        .unwrap();
    conn.send(&[1u8; 3000]).await.unwrap();

    conn.close().await.expect("close");

    assert_eq!(received.lock().unwrap().len(), 3000);
    let log = log.lock().unwrap();
    let fin_pos = log.sent.iter().position(|p| p.header.is_fin()).unwrap();
    assert!(log.sent[..fin_pos].iter().any(|p| p.header.seq == 2001));
    assert_eq!(fin_pos, log.sent.len() - 1);
}
