//! Channel manager integration tests: selection, failover, send routing and shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Reply, drain, managed, managed_with, wait_for_event};
use pretty_assertions::assert_eq;
use serde_json::json;
use turbolink::{
    ChannelConfig, ChannelManager, ChannelStatus, ConnectionError, ConnectionEvent, SwitchOutcome,
    TransportError,
};

#[tokio::test]
async fn test_failover_picks_highest_priority() {
    let manager = ChannelManager::default();
    let (a, _) = managed("a", 1, Reply::Payload);
    let (b, _) = managed("b", 5, Reply::Payload);
    let (c, _) = managed("c", 3, Reply::Payload);

    for channel in [&a, &b, &c] {
        manager.register_channel(Arc::clone(channel)).unwrap();
    }
    a.initialize().await;
    manager.set_current_channel("a").unwrap();
    assert_eq!(b.status(), ChannelStatus::Idle);

    let mut events = manager.subscribe();
    let outcome = manager.switch_channel("manual").await.unwrap();

    assert_eq!(
        outcome,
        SwitchOutcome::Switched {
            from: Some("a".into()),
            to: "b".into()
        }
    );
    assert_eq!(manager.get_current_channel_id().as_deref(), Some("b"));

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            ConnectionEvent::SwitchInitiated {
                from: Some("a".into()),
                to: "b".into(),
                reason: "manual".into(),
            },
            ConnectionEvent::SwitchCompleted {
                from: Some("a".into()),
                to: "b".into(),
            },
        ]
    );
}

#[tokio::test]
async fn test_equal_priority_keeps_registration_order() {
    let manager = ChannelManager::default();
    let (z, _) = managed("z", 1, Reply::Payload);
    let (x, _) = managed("x", 5, Reply::Payload);
    let (y, _) = managed("y", 5, Reply::Payload);

    for channel in [z, x, y] {
        manager.register_channel(channel).unwrap();
    }
    manager.set_current_channel("z").unwrap();

    let ids: Vec<_> = manager
        .get_available_channels()
        .iter()
        .map(|c| c.id().to_string())
        .collect();
    assert_eq!(ids, vec!["x", "y", "z"]);

    let outcome = manager.switch_channel("tie").await.unwrap();
    assert_eq!(outcome.target(), Some("x"));
}

#[tokio::test]
async fn test_send_retries_once_on_new_channel() {
    let manager = ChannelManager::default();
    let (a, a_transport) = managed("a", 10, Reply::Payload);
    let (b, b_transport) = managed("b", 5, Reply::Echo);
    manager.register_channel(a.clone()).unwrap();
    manager.register_channel(b.clone()).unwrap();
    a.initialize().await;
    b.initialize().await;
    manager.set_current_channel("a").unwrap();

    a_transport.fail_sends(true);
    let reply = manager.send(json!({"hello": "world"}), false).await.unwrap();

    assert_eq!(reply, json!({"echo": {"hello": "world"}}));
    assert_eq!(manager.get_current_channel_id().as_deref(), Some("b"));
    assert_eq!(a_transport.send_count(), 1);
    assert_eq!(b_transport.send_count(), 1);

    let stats = manager.stats();
    assert_eq!(stats.sends, 1);
    assert_eq!(stats.send_failures, 1);
    assert_eq!(stats.failover_retries, 1);
    assert_eq!(stats.successful_failover_retries, 1);
    assert_eq!(stats.switches_completed, 1);
}

#[tokio::test]
async fn test_retry_failure_propagates() {
    let manager = ChannelManager::default();
    let (a, a_transport) = managed("a", 10, Reply::Payload);
    let (b, b_transport) = managed("b", 5, Reply::Payload);
    manager.register_channel(a).unwrap();
    manager.register_channel(b).unwrap();
    manager.set_current_channel("a").unwrap();

    a_transport.fail_sends(true);
    b_transport.fail_sends(true);

    let err = manager.send(json!(1), false).await.unwrap_err();
    assert_eq!(
        err,
        ConnectionError::Transport(TransportError::SendFailed("fail".into()))
    );
    // Exactly one retry, no second switch
    assert_eq!(b_transport.send_count(), 1);
    assert_eq!(manager.get_current_channel_id().as_deref(), Some("b"));
    assert_eq!(manager.stats().switches_completed, 1);
}

#[tokio::test]
async fn test_send_failure_without_candidates() {
    let manager = ChannelManager::default();
    let (a, a_transport) = managed("a", 1, Reply::Payload);
    manager.register_channel(a).unwrap();
    manager.set_current_channel("a").unwrap();
    a_transport.fail_sends(true);

    let mut events = manager.subscribe();
    assert_eq!(
        manager.send(json!(1), false).await,
        Err(ConnectionError::NoAvailableChannels)
    );

    let names: Vec<_> = drain(&mut events).iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["no.available.channels", "switch.failed"]);
    assert_eq!(manager.get_current_channel_id().as_deref(), Some("a"));
}

#[tokio::test]
async fn test_send_without_current_channel() {
    let manager = ChannelManager::default();
    assert_eq!(
        manager.send(json!({}), false).await,
        Err(ConnectionError::NotInitialized)
    );
}

#[tokio::test]
async fn test_no_available_channels() {
    let manager = ChannelManager::default();
    let mut events = manager.subscribe();

    assert_eq!(
        manager.switch_channel("empty").await,
        Err(ConnectionError::NoAvailableChannels)
    );

    let events = drain(&mut events);
    assert_eq!(
        events[0],
        ConnectionEvent::NoAvailableChannels {
            current_channel: None
        }
    );
    assert_eq!(
        events[1],
        ConnectionEvent::SwitchFailed {
            from: None,
            to: None,
            error: ConnectionError::NoAvailableChannels,
        }
    );
    assert!(!manager.is_switching());

    // All registered channels unavailable
    let (a, transport) = managed("a", 1, Reply::Payload);
    transport.refuse_connect(true);
    manager.register_channel(a.clone()).unwrap();
    a.initialize().await;

    assert_eq!(
        manager.switch_channel("all down").await,
        Err(ConnectionError::NoAvailableChannels)
    );
    assert_eq!(manager.stats().switches_failed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_switches_are_exclusive() {
    let manager = ChannelManager::default();
    for (id, priority) in [("a", 1), ("b", 2), ("c", 3)] {
        let (channel, _) = managed(id, priority, Reply::Payload);
        manager.register_channel(channel).unwrap();
    }
    manager.set_current_channel("a").unwrap();
    let mut events = manager.subscribe();

    let attempts = 32;
    let handles: Vec<_> = (0..attempts)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.switch_channel("race").await })
        })
        .collect();

    let mut switched = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            SwitchOutcome::Switched { from, to } => {
                assert_ne!(from.as_deref(), Some(to.as_str()));
                switched += 1;
            }
            SwitchOutcome::AlreadyInProgress => {}
        }
    }

    let completed = drain(&mut events)
        .iter()
        .filter(|e| e.name() == "switch.completed")
        .count();
    let stats = manager.stats();

    assert!(switched >= 1);
    assert_eq!(completed, switched);
    assert_eq!(stats.switches_completed as usize, switched);
    assert_eq!(
        stats.switches_completed + stats.switches_skipped,
        attempts as u64
    );
    assert!(!manager.is_switching());
}

#[tokio::test(start_paused = true)]
async fn test_health_threshold_fails_over_current_channel() {
    let manager = ChannelManager::default();
    let (a, a_transport) = managed_with(
        ChannelConfig::new("a", 10)
            .with_health_check_interval(Duration::from_millis(100))
            .with_retry_attempts(2),
        Reply::Payload,
    );
    let (b, _) = managed("b", 5, Reply::Payload);
    manager.register_channel(a.clone()).unwrap();
    manager.register_channel(b.clone()).unwrap();
    a.initialize().await;
    b.initialize().await;
    manager.set_current_channel("a").unwrap();

    let mut events = manager.subscribe();
    a_transport.set_unhealthy(true);

    match wait_for_event(&mut events, "channel.unavailable").await {
        ConnectionEvent::ChannelUnavailable { channel_id, error } => {
            assert_eq!(channel_id, "a");
            assert_eq!(error, TransportError::ConnectionLost("a is down".into()));
        }
        other => panic!("unexpected event {other:?}"),
    }

    match wait_for_event(&mut events, "switch.initiated").await {
        ConnectionEvent::SwitchInitiated { reason, to, .. } => {
            assert_eq!(reason, "channel unavailable");
            assert_eq!(to, "b");
        }
        other => panic!("unexpected event {other:?}"),
    }
    wait_for_event(&mut events, "switch.completed").await;
    assert_eq!(manager.get_current_channel_id().as_deref(), Some("b"));

    // Recovery makes the channel a candidate again
    a_transport.set_unhealthy(false);
    wait_for_event(&mut events, "channel.recovered").await;
    assert_eq!(a.status(), ChannelStatus::Idle);

    let outcome = manager.switch_channel("manual").await.unwrap();
    assert_eq!(outcome.target(), Some("a"));
}

#[tokio::test]
async fn test_channel_events_are_forwarded() {
    let manager = ChannelManager::default();
    let (a, transport) = managed("a", 1, Reply::Payload);
    transport.refuse_connect(true);
    manager.register_channel(a.clone()).unwrap();
    let mut events = manager.subscribe();

    a.initialize().await;

    let event = wait_for_event(&mut events, "channel.unavailable").await;
    assert_eq!(event.channel_id(), Some("a"));
    // Not current, so no switch attempt
    tokio::task::yield_now().await;
    assert_eq!(manager.stats().switches_failed, 0);
}

#[tokio::test]
async fn test_duplicate_registration_rejected() {
    let manager = ChannelManager::default();
    let (first, _) = managed("a", 1, Reply::Payload);
    let (second, _) = managed("a", 9, Reply::Payload);

    manager.register_channel(first).unwrap();
    assert_eq!(
        manager.register_channel(second),
        Err(ConnectionError::DuplicateChannel("a".into()))
    );
    assert_eq!(manager.channel_count(), 1);
    assert_eq!(manager.get_channel("a").unwrap().priority(), 1);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let manager = ChannelManager::default();
    let (a, a_transport) = managed("a", 1, Reply::Payload);
    let (b, b_transport) = managed("b", 2, Reply::Payload);
    manager.register_channel(a.clone()).unwrap();
    manager.register_channel(b.clone()).unwrap();
    a.initialize().await;
    b.initialize().await;
    manager.set_current_channel("b").unwrap();

    manager.shutdown().await;
    manager.shutdown().await;

    assert_eq!(manager.channel_count(), 0);
    assert!(manager.get_current_channel().is_none());
    assert_eq!(manager.buffered_requests(), 0);
    for (channel, transport) in [(&a, &a_transport), (&b, &b_transport)] {
        assert_eq!(channel.status(), ChannelStatus::Unavailable);
        assert!(!channel.is_health_loop_running());
        assert_eq!(
            transport
                .disconnects
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }
    assert_eq!(
        manager.send(json!(1), false).await,
        Err(ConnectionError::NotInitialized)
    );
}
