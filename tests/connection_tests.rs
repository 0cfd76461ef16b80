// Connection manager tests
// Drive the state machine against the scripted in-memory connector on tokio's
// paused clock, so heartbeat and backoff timings are exact.

mod common;
use common::{settle, setup_logging, test_config, MockConnector, Step};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use murmur::models::{ChatPayload, ConnectionPhase, ConnectionState};
use murmur::ws::{ConnectionError, ConnectionManager, TransportError};

fn phase_log(manager: &ConnectionManager) -> Arc<Mutex<Vec<(ConnectionPhase, u32)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let mut states = manager.watch_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            let entry = (state.phase, state.reconnect_attempts);
            let mut log = sink.lock().unwrap();
            if log.last() != Some(&entry) {
                log.push(entry);
            }
        }
    });
    log
}

#[tokio::test(start_paused = true)]
async fn test_connect_success() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());

    manager.connect().await.unwrap();

    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert!(state.is_connected);
    assert!(!state.is_reconnecting);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(connector.open_count(), 1);

    // Connecting again while connected does not open a second transport
    manager.connect().await.unwrap();
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_is_reported_once_and_not_retried() {
    setup_logging();
    let connector = MockConnector::refusing();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());

    let err = manager.connect().await.unwrap_err();
    assert!(matches!(err, ConnectionError::Transport(TransportError::Open { .. })));
    assert_eq!(manager.state(), ConnectionState::default());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.open_count(), 1, "A failed connect() must not schedule reconnects");
    assert_eq!(manager.state().phase, ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_while_connected() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());
    manager.connect().await.unwrap();
    let mut server = connector.take_server();

    // Nothing before the first interval elapses
    tokio::time::sleep(Duration::from_millis(29_990)).await;
    assert!(server.drain().is_empty());

    tokio::time::sleep(Duration::from_millis(60_020)).await;
    assert_eq!(server.drain(), vec![r#"{"type":"ping"}"#; 3]);
    assert_eq!(manager.state().phase, ConnectionPhase::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_skipped_when_outbound_closed() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());
    manager.connect().await.unwrap();
    let mut server = connector.take_server();

    tokio::time::sleep(Duration::from_millis(30_010)).await;
    assert_eq!(server.drain(), vec![r#"{"type":"ping"}"#]);

    let mut states = manager.watch_state();
    states.borrow_and_update();
    server.stop_reading();

    // Several intervals pass with nowhere to write
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert!(server.drain().is_empty());
    assert!(!states.has_changed().unwrap(), "a skipped heartbeat must not touch the state");
    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert!(state.is_connected);
    assert!(!state.is_reconnecting);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(connector.open_count(), 1);

    // The link is still usable inbound
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _subscription = manager.on_message(move |payload| {
        sink.lock().unwrap().push(payload.text.clone());
        Ok(())
    });
    server.send_chat("Ann", "still here");
    settle().await;
    assert_eq!(*received.lock().unwrap(), vec!["still here".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_stops_after_close() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 0;
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(config, connector.clone());
    manager.connect().await.unwrap();
    let mut server = connector.take_server();

    server.close();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(server.drain().is_empty());
    assert_eq!(manager.state().phase, ConnectionPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_are_validated_before_dispatch() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let _subscription = manager.on_message(move |payload| {
        sink.lock().unwrap().push(payload.clone());
        Ok(())
    });

    manager.connect().await.unwrap();
    let server = connector.take_server();

    server.send_chat("Ann", "hi");
    server.send_text("{oops");
    server.send_text(r#"{"type":"ping"}"#);
    server.send_text(r#"{"message":{"from":"Ann"}}"#);
    server.send_text(r#"{"message":{"from":"","message":"anonymous"}}"#);
    server.send_chat("Bob", "yo");
    settle().await;

    assert_eq!(
        *received.lock().unwrap(),
        vec![ChatPayload::new("Ann", "hi"), ChatPayload::new("Bob", "yo")]
    );
    assert_eq!(manager.state().phase, ConnectionPhase::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_failing_subscriber_does_not_block_others() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());
    let mut failures = manager.failure_reports();

    let _broken = manager.on_message(|_| Err(anyhow!("not today")));
    let count = Arc::new(Mutex::new(0));
    let counter = count.clone();
    let _working = manager.on_message(move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });

    manager.connect().await.unwrap();
    let server = connector.take_server();
    server.send_chat("Ann", "hi");
    settle().await;

    assert_eq!(*count.lock().unwrap(), 1);
    let failure = failures.try_recv().unwrap();
    assert_eq!(failure.reason, "not today");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_backoff_until_failed() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 3;
    let connector = MockConnector::scripted(vec![Step::Accept], Step::Refuse);
    let manager = ConnectionManager::with_connector(config, connector.clone());

    manager.connect().await.unwrap();
    let server = connector.take_server();
    server.close();

    manager
        .watch_state()
        .wait_for(|s| s.phase == ConnectionPhase::Failed)
        .await
        .unwrap();
    let failed = manager.state();
    assert!(!failed.is_connected);
    assert!(!failed.is_reconnecting);
    assert_eq!(failed.reconnect_attempts, 3, "Counter is kept on entering Failed");

    let opens = connector.open_times();
    assert_eq!(opens.len(), 4);
    let gaps: Vec<Duration> = opens.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_millis(3000),
            Duration::from_millis(4500),
            Duration::from_millis(6750),
        ]
    );

    // Terminal: nothing else gets scheduled
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(connector.open_count(), 4);
    assert_eq!(manager.state().phase, ConnectionPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_two_attempts_then_failed() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 2;
    let connector = MockConnector::scripted(vec![Step::Accept], Step::Refuse);
    let manager = ConnectionManager::with_connector(config, connector.clone());
    let log = phase_log(&manager);

    manager.connect().await.unwrap();
    settle().await;
    connector.take_server().close();
    tokio::time::sleep(Duration::from_secs(60)).await;

    let log = log.lock().unwrap().clone();
    let tail = &log[log.len() - 4..];
    assert_eq!(
        tail,
        &[
            (ConnectionPhase::Connected, 0),
            (ConnectionPhase::Reconnecting, 1),
            (ConnectionPhase::Reconnecting, 2),
            (ConnectionPhase::Failed, 2),
        ]
    );
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_zero_attempts_fails_immediately() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 0;
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(config, connector.clone());

    manager.connect().await.unwrap();
    connector.take_server().close();
    settle().await;

    assert_eq!(manager.state().phase, ConnectionPhase::Failed);
    assert_eq!(manager.state().reconnect_attempts, 0);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_successful_reconnect_resets_attempts() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());

    manager.connect().await.unwrap();
    connector.take_server().close();
    settle().await;

    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Reconnecting);
    assert!(state.is_reconnecting);
    assert!(!state.is_connected);
    assert_eq!(state.reconnect_attempts, 1);

    tokio::time::sleep(Duration::from_millis(3000)).await;
    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert!(state.is_connected);
    assert!(!state.is_reconnecting);
    assert_eq!(state.reconnect_attempts, 0);
    assert_eq!(connector.open_count(), 2);

    // The new link works
    let received = Arc::new(Mutex::new(0));
    let counter = received.clone();
    let _subscription = manager.on_message(move |_| {
        *counter.lock().unwrap() += 1;
        Ok(())
    });
    let server = connector.take_server();
    server.send_chat("Ann", "back again");
    settle().await;
    assert_eq!(*received.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_recovers_from_failed() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 1;
    let connector = MockConnector::scripted(vec![Step::Accept, Step::Refuse], Step::Accept);
    let manager = ConnectionManager::with_connector(config, connector.clone());

    manager.connect().await.unwrap();
    connector.take_server().close();
    manager
        .watch_state()
        .wait_for(|s| s.phase == ConnectionPhase::Failed)
        .await
        .unwrap();

    manager.connect().await.unwrap();
    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Connected);
    assert_eq!(state.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_refused_connect_from_failed_keeps_attempts() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 1;
    let connector = MockConnector::scripted(vec![Step::Accept], Step::Refuse);
    let manager = ConnectionManager::with_connector(config, connector.clone());

    manager.connect().await.unwrap();
    connector.take_server().close();
    manager
        .watch_state()
        .wait_for(|s| s.phase == ConnectionPhase::Failed)
        .await
        .unwrap();

    assert!(matches!(manager.connect().await, Err(ConnectionError::Transport(_))));
    let state = manager.state();
    assert_eq!(state.phase, ConnectionPhase::Disconnected);
    assert!(!state.is_connected);
    assert!(!state.is_reconnecting);
    assert_eq!(state.reconnect_attempts, 1);

    // No reconnect is scheduled after an explicit connect fails
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.open_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_reconnect() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());

    manager.connect().await.unwrap();
    connector.take_server().close();
    settle().await;
    assert_eq!(manager.state().phase, ConnectionPhase::Reconnecting);

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::default());

    // The reconnect that was due at +3s never fires
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(connector.open_count(), 1);
    assert_eq!(manager.state(), ConnectionState::default());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connected() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());
    manager.connect().await.unwrap();
    let mut server = connector.take_server();

    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::default());
    assert!(server.client_closed().await, "Transport should be closed");

    // No heartbeats and no reconnects afterwards
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert!(server.drain().is_empty());
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_connect_in_flight() {
    setup_logging();
    let connector = MockConnector::scripted(vec![Step::Hang], Step::Accept);
    let manager = Arc::new(ConnectionManager::with_connector(test_config(), connector.clone()));

    let pending = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.connect().await })
    };
    settle().await;
    assert_eq!(manager.state().phase, ConnectionPhase::Connecting);

    manager.disconnect().await;
    assert_eq!(pending.await.unwrap(), Err(ConnectionError::Cancelled));
    assert_eq!(manager.state(), ConnectionState::default());

    // A fresh connect goes through
    manager.connect().await.unwrap();
    assert_eq!(connector.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_from_every_state_resets() {
    setup_logging();
    let mut config = test_config();
    config.max_reconnect_attempts = 1;
    let connector = MockConnector::scripted(vec![Step::Accept, Step::Refuse], Step::Accept);
    let manager = ConnectionManager::with_connector(config, connector.clone());

    // Disconnected
    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::default());

    // Failed
    manager.connect().await.unwrap();
    connector.take_server().close();
    manager
        .watch_state()
        .wait_for(|s| s.phase == ConnectionPhase::Failed)
        .await
        .unwrap();
    assert_eq!(manager.state().reconnect_attempts, 1);
    manager.disconnect().await;
    assert_eq!(manager.state(), ConnectionState::default());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_manager_closes_transport() {
    setup_logging();
    let connector = MockConnector::accepting();
    let manager = ConnectionManager::with_connector(test_config(), connector.clone());
    manager.connect().await.unwrap();
    let mut server = connector.take_server();

    drop(manager);
    assert!(server.client_closed().await);
}
