//! Connection service lifecycle and facade tests.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{ConnectLog, Reply, managed, wait_for_event};
use pretty_assertions::assert_eq;
use serde_json::json;
use turbolink::{
    BufferConfig, ChannelConfig, ChannelStatus, ChannelSummary, ConnectionError, ConnectionEvent,
    ConnectionService, ConnectionServiceConfig, SwitchOutcome,
};

#[tokio::test]
async fn test_initialize_selects_best_available_channel() {
    let service = ConnectionService::new();
    let (a, a_transport) = managed("a", 10, Reply::Via);
    let (b, _) = managed("b", 5, Reply::Via);
    let (c, _) = managed("c", 1, Reply::Via);
    a_transport.refuse_connect(true);

    service.initialize(vec![a, b, c]).await.unwrap();

    assert!(service.is_initialized());
    assert_eq!(service.get_current_channel_id().unwrap().as_deref(), Some("b"));
    assert_eq!(service.get_channel_status("a"), Ok(ChannelStatus::Unavailable));
    assert_eq!(service.get_channel_status("b"), Ok(ChannelStatus::Connected));
    assert_eq!(
        service.get_available_channels().unwrap(),
        vec![
            ChannelSummary {
                id: "b".into(),
                priority: 5,
                status: ChannelStatus::Connected,
                endpoint: Some("scripted://b".into()),
            },
            ChannelSummary {
                id: "c".into(),
                priority: 1,
                status: ChannelStatus::Connected,
                endpoint: Some("scripted://c".into()),
            },
        ]
    );

    assert_eq!(
        service.send(json!({"q": 1}), false).await,
        Ok(json!({"via": "b"}))
    );
    service.shutdown().await;
}

#[tokio::test]
async fn test_initialize_connects_sequentially_in_order() {
    let service = ConnectionService::new();
    let (a, a_transport) = managed("a", 1, Reply::Payload);
    let (b, b_transport) = managed("b", 2, Reply::Payload);
    let order = ConnectLog::default();
    a_transport.record_connects(&order);
    b_transport.record_connects(&order);

    // The lower priority channel is listed first and must still connect first
    service.initialize(vec![a, b]).await.unwrap();
    assert_eq!(order.names(), vec!["a", "b"]);
    assert_eq!(a_transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(b_transport.connects.load(Ordering::SeqCst), 1);
    assert_eq!(service.get_current_channel_id().unwrap().as_deref(), Some("b"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_initialize_twice_fails() {
    let service = ConnectionService::new();
    let (a, _) = managed("a", 1, Reply::Payload);
    let (b, _) = managed("b", 1, Reply::Payload);

    service.initialize(vec![a]).await.unwrap();
    assert_eq!(
        service.initialize(vec![b]).await,
        Err(ConnectionError::AlreadyInitialized)
    );
    assert_eq!(service.manager().channel_count(), 1);
    service.shutdown().await;
}

#[tokio::test]
async fn test_operations_before_initialize() {
    let service = ConnectionService::new();

    assert_eq!(
        service.send(json!(1), false).await,
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.switch_channel(None).await,
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.force_health_check("a").await.unwrap_err(),
        ConnectionError::NotInitialized
    );
    assert_eq!(
        service.get_current_channel_id(),
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.get_channel_status("a"),
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.get_available_channels(),
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.get_channel_health("a").unwrap_err(),
        ConnectionError::NotInitialized
    );

    // Shutdown before initialize is a no-op
    service.shutdown().await;
}

#[tokio::test]
async fn test_queries_gated_after_shutdown() {
    let service = ConnectionService::new();
    let (a, _) = managed("a", 1, Reply::Payload);

    service.initialize(vec![a]).await.unwrap();
    assert_eq!(service.get_channel_status("a"), Ok(ChannelStatus::Connected));
    assert_eq!(
        service.get_channel_status("missing"),
        Err(ConnectionError::NotFound("missing".into()))
    );

    service.shutdown().await;
    assert_eq!(
        service.get_current_channel_id(),
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.get_channel_status("a"),
        Err(ConnectionError::NotInitialized)
    );
    assert_eq!(
        service.get_available_channels(),
        Err(ConnectionError::NotInitialized)
    );
}

#[tokio::test]
async fn test_failed_initialize_rolls_back() {
    let service = ConnectionService::new();
    let (a, a_transport) = managed("a", 1, Reply::Payload);
    let (b, b_transport) = managed("b", 2, Reply::Payload);
    a_transport.refuse_connect(true);
    b_transport.refuse_connect(true);

    assert_eq!(
        service.initialize(vec![a.clone(), b.clone()]).await,
        Err(ConnectionError::NoAvailableChannels)
    );
    assert!(!service.is_initialized());
    assert_eq!(service.manager().channel_count(), 0);

    // A later attempt starts from a clean registry
    a_transport.refuse_connect(false);
    service.initialize(vec![a, b]).await.unwrap();
    assert_eq!(service.get_current_channel_id().unwrap().as_deref(), Some("a"));
    service.shutdown().await;
}

#[tokio::test]
async fn test_initialize_with_no_channels() {
    let service = ConnectionService::new();
    assert_eq!(
        service.initialize(Vec::new()).await,
        Err(ConnectionError::NoAvailableChannels)
    );
}

#[tokio::test]
async fn test_initialize_rejects_duplicates_and_bad_config() {
    let service = ConnectionService::new();
    let (a, _) = managed("a", 1, Reply::Payload);
    let (a_again, _) = managed("a", 2, Reply::Payload);

    assert_eq!(
        service.initialize(vec![a, a_again]).await,
        Err(ConnectionError::DuplicateChannel("a".into()))
    );
    assert_eq!(service.manager().channel_count(), 0);

    let (bad, _) = common::managed_with(
        ChannelConfig::new("bad", 1).with_retry_attempts(0),
        Reply::Payload,
    );
    assert!(matches!(
        service.initialize(vec![bad]).await,
        Err(ConnectionError::Config(_))
    ));
}

#[tokio::test]
async fn test_shutdown_allows_reinitialize() {
    let service = ConnectionService::new();
    let (a, a_transport) = managed("a", 1, Reply::Payload);

    service.initialize(vec![a.clone()]).await.unwrap();
    service.shutdown().await;
    service.shutdown().await;

    assert!(!service.is_initialized());
    assert_eq!(a.status(), ChannelStatus::Unavailable);
    assert!(!a.is_health_loop_running());
    assert_eq!(a_transport.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(
        service.send(json!(1), false).await,
        Err(ConnectionError::NotInitialized)
    );

    service.initialize(vec![a.clone()]).await.unwrap();
    assert_eq!(a.status(), ChannelStatus::Connected);
    assert_eq!(service.send(json!("again"), false).await, Ok(json!("again")));
    service.shutdown().await;
}

#[tokio::test]
async fn test_switch_channel_default_reason() {
    let service = ConnectionService::new();
    let (a, _) = managed("a", 2, Reply::Payload);
    let (b, _) = managed("b", 1, Reply::Payload);
    service.initialize(vec![a, b]).await.unwrap();
    let mut events = service.subscribe();

    let outcome = service.switch_channel(None).await.unwrap();
    assert_eq!(
        outcome,
        SwitchOutcome::Switched {
            from: Some("a".into()),
            to: "b".into()
        }
    );

    match wait_for_event(&mut events, "switch.initiated").await {
        ConnectionEvent::SwitchInitiated { reason, .. } => assert_eq!(reason, "auto-switch"),
        other => panic!("unexpected event {other:?}"),
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_health_check_reporting() {
    let service = ConnectionService::new();
    let (a, a_transport) = managed("a", 1, Reply::Payload);
    service.initialize(vec![a.clone()]).await.unwrap();

    a_transport.set_unhealthy(true);
    let result = service.force_health_check("a").await.unwrap();
    assert!(!result.is_healthy);
    assert!(result.error.is_some());

    // Reporting never changes status
    assert_eq!(a.status(), ChannelStatus::Connected);
    let report = service.get_channel_health("a").unwrap();
    assert_eq!(report.status, ChannelStatus::Connected);
    assert_eq!(report.is_healthy, Some(false));

    assert_eq!(
        service.force_health_check("missing").await.unwrap_err(),
        ConnectionError::NotFound("missing".into())
    );
    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_fails_over_through_service() {
    let config = ConnectionServiceConfig::default()
        .with_buffer(BufferConfig::new(10, Duration::from_secs(30)));
    let service = ConnectionService::with_config(config);
    let (a, a_transport) = managed("a", 2, Reply::Via);
    let (b, _) = managed("b", 1, Reply::Via);
    service.initialize(vec![a, b]).await.unwrap();

    a_transport.fail_sends(true);
    let reply = service.send(json!("first"), false).await.unwrap();
    assert_eq!(reply, json!({"via": "b"}));

    let stats = service.stats();
    assert_eq!(stats.failover_retries, 1);
    assert_eq!(service.manager().buffered_requests(), 0);
    service.shutdown().await;
}
