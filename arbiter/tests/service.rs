use rtt_arbiter::{
    test_utils::{client, target, MockDriver},
    ArbiterConfig, ArbiterHandle, ArbiterService, ArbiterState, ChannelSink, ClientId, Error,
    FailureReason, Notification, NotifySink, RangingDriver, RangingResult, SimulatedDriver,
};
use std::{sync::Arc, time::Duration};

fn without_watchdog() -> ArbiterConfig {
    ArbiterConfig {
        ranging_timeout_ms: 0,
        ..ArbiterConfig::default()
    }
}

#[tokio::test]
async fn test_service_round_trip() {
    let service = ArbiterService::new(without_watchdog());
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver.clone(), Arc::new(sink));

    let c1 = client(1);
    handle.driver_loaded().unwrap();
    handle.start_ranging(c1, 1, vec![target(1)], true).unwrap();

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ArbiterState::Ranging);
    assert_eq!(snapshot.in_flight.map(|r| r.key), Some(1));

    let burst = driver.last_burst().unwrap();
    handle
        .driver_result(burst, vec![RangingResult::success(target(1).peer, 3_000, -55)])
        .unwrap();

    let (to, notification) = rx.recv().await.unwrap();
    assert_eq!(to, c1);
    assert!(matches!(notification, Notification::Succeeded { key: 1, .. }));
    assert_eq!(handle.snapshot().await.unwrap().state, ArbiterState::Idle);

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_posting_after_shutdown_fails() {
    let service = ArbiterService::new(without_watchdog());
    let handle = service.handle();
    let (sink, _rx) = ChannelSink::new();
    let task = service.spawn(Arc::new(MockDriver::new()), Arc::new(sink));

    handle.shutdown().unwrap();
    task.await.unwrap();

    assert!(matches!(handle.driver_loaded(), Err(Error::InboxClosed)));
    assert!(matches!(handle.snapshot().await, Err(Error::InboxClosed)));
}

#[tokio::test]
async fn test_shutdown_handles_earlier_events_first() {
    let service = ArbiterService::new(without_watchdog());
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver.clone(), Arc::new(sink));

    let c1 = client(1);
    handle.driver_loaded().unwrap();
    handle.enable_responder(c1, 4, true).unwrap();
    handle.shutdown().unwrap();
    task.await.unwrap();

    assert_eq!(driver.enable_count(), 1);
    let (_, notification) = rx.recv().await.unwrap();
    assert!(matches!(notification, Notification::ResponderEnabled { key: 4, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_fails_stuck_burst() {
    let config = ArbiterConfig {
        ranging_timeout_ms: 250,
        ..ArbiterConfig::default()
    };
    let service = ArbiterService::new(config);
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver.clone(), Arc::new(sink));

    let c1 = client(1);
    let c2 = client(2);
    handle.driver_loaded().unwrap();
    handle.start_ranging(c1, 1, vec![target(1)], true).unwrap();
    handle.start_ranging(c2, 2, vec![target(2)], true).unwrap();

    // The mock never answers, so only the watchdog can end the burst
    let (to, notification) = rx.recv().await.unwrap();
    assert_eq!(to, c1);
    assert_eq!(notification.failure_reason(), Some(FailureReason::Unspecified));
    match notification {
        Notification::Failed { description, .. } => assert!(description.contains("timed out")),
        other => panic!("Expected Failed, got {:?}", other),
    }

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.in_flight.map(|r| r.client), Some(c2));
    // The stuck burst is cancelled before the next one goes out
    assert_eq!(driver.cancel_count(), 1);

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_after_result_is_dropped() {
    let config = ArbiterConfig {
        ranging_timeout_ms: 250,
        ..ArbiterConfig::default()
    };
    let service = ArbiterService::new(config);
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver.clone(), Arc::new(sink));

    let c1 = client(1);
    handle.driver_loaded().unwrap();
    handle.start_ranging(c1, 1, vec![target(1)], true).unwrap();
    handle.snapshot().await.unwrap();

    let burst = driver.last_burst().unwrap();
    handle.driver_result(burst, vec![]).unwrap();
    let (_, notification) = rx.recv().await.unwrap();
    assert!(matches!(notification, Notification::Succeeded { key: 1, .. }));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(handle.snapshot().await.unwrap().state, ArbiterState::Idle);
    assert!(rx.try_recv().is_err());

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_simulated_driver_serves_every_client() {
    let service = ArbiterService::new(without_watchdog());
    let handle = service.handle();
    let driver: Arc<dyn RangingDriver> = Arc::new(SimulatedDriver::new(
        &handle,
        Duration::from_millis(20),
        0.0,
    ));
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver, Arc::new(sink));

    handle.driver_loaded().unwrap();
    for n in 1..=3 {
        handle
            .start_ranging(client(n), 1, vec![target(1), target(2)], true)
            .unwrap();
    }

    let mut served = Vec::new();
    for _ in 0..3 {
        let (to, notification) = rx.recv().await.unwrap();
        match notification {
            Notification::Succeeded { results, .. } => {
                assert_eq!(results.len(), 2);
                assert!(results.iter().all(RangingResult::is_success));
            }
            other => panic!("Expected Succeeded, got {:?}", other),
        }
        served.push(to);
    }
    // FIFO across clients
    assert_eq!(served, vec![client(1), client(2), client(3)]);

    handle.shutdown().unwrap();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dropping_every_handle_stops_arbiter() {
    let config = ArbiterConfig {
        ranging_timeout_ms: 60_000,
        ..ArbiterConfig::default()
    };
    let service = ArbiterService::new(config);
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (sink, mut rx) = ChannelSink::new();
    let task = service.spawn(driver.clone(), Arc::new(sink));

    handle.driver_loaded().unwrap();
    handle.start_ranging(client(1), 1, vec![target(1)], true).unwrap();
    handle.start_ranging(client(2), 2, vec![target(2)], true).unwrap();
    assert_eq!(handle.snapshot().await.unwrap().state, ArbiterState::Ranging);
    let weak = handle.downgrade();

    // Neither the arbiter nor the armed watchdog keeps the inbox open
    drop(handle);
    tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();

    assert!(weak.upgrade().is_none());
    assert!(rx.recv().await.is_none());
}

/// Asks for a responder lease as soon as its ranging request succeeds
#[derive(Debug)]
struct EnableOnSuccess {
    handle: ArbiterHandle,
    responder: ClientId,
    forward: ChannelSink,
}

impl NotifySink for EnableOnSuccess {
    fn notify(&self, client: ClientId, notification: Notification) {
        if matches!(notification, Notification::Succeeded { .. }) {
            self.handle.enable_responder(self.responder, 9, true).unwrap();
        }
        self.forward.notify(client, notification);
    }
}

#[tokio::test]
async fn test_enable_posted_from_sink_is_granted() {
    let service = ArbiterService::new(without_watchdog());
    let handle = service.handle();
    let driver = Arc::new(MockDriver::new());
    let (forward, mut rx) = ChannelSink::new();
    let c1 = client(1);
    let c2 = client(2);
    let sink = EnableOnSuccess {
        handle: handle.clone(),
        responder: c2,
        forward,
    };
    let task = service.spawn(driver.clone(), Arc::new(sink));

    handle.driver_loaded().unwrap();
    handle.start_ranging(c1, 1, vec![target(1)], true).unwrap();
    handle.snapshot().await.unwrap();
    let burst = driver.last_burst().unwrap();
    handle.driver_result(burst, vec![]).unwrap();

    let (to, notification) = rx.recv().await.unwrap();
    assert_eq!(to, c1);
    assert!(matches!(notification, Notification::Succeeded { key: 1, .. }));
    let (to, notification) = rx.recv().await.unwrap();
    assert_eq!(to, c2);
    assert!(matches!(notification, Notification::ResponderEnabled { key: 9, .. }));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, ArbiterState::Responding);
    assert_eq!(driver.enable_count(), 1);

    // The sink's own handle keeps the inbox open
    handle.shutdown().unwrap();
    task.await.unwrap();
}
