use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use utm_stream::{
    ChannelLineSource, CompletionReason, ConnectionState, Event, LoggerConfig, ReconnectPolicy,
    SegmentationConfig, SourceConfig, StreamController, StreamError, TestState,
};

fn config(reconnect: ReconnectPolicy) -> LoggerConfig {
    LoggerConfig {
        segmentation: SegmentationConfig::fixed(Duration::from_millis(300)),
        reconnect,
        poll_interval_ms: 100,
        ..Default::default()
    }
}

fn reconnecting() -> ReconnectPolicy {
    ReconnectPolicy {
        enabled: true,
        interval_ms: 100,
        max_attempts: None,
    }
}

// =============================================================================
// DISCONNECT AND RECONNECT
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_disconnect_completes_test_and_reconnect_starts_fresh() {
    let (feed, source) = ChannelLineSource::new(32);
    let mut controller =
        StreamController::with_source(config(reconnecting()), Box::new(source)).unwrap();
    controller.start().unwrap();

    feed.line("1.0").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    feed.line("1.5").await.unwrap();
    sleep(Duration::from_millis(50)).await;
    feed.hangup().await.unwrap();

    // Back within the gap threshold, still a new test
    sleep(Duration::from_millis(150)).await;
    feed.line("2.0").await.unwrap();
    sleep(Duration::from_millis(150)).await;

    controller.stop().await.unwrap();

    let session = controller.session();
    let session = session.read();
    let tests = session.list_tests();
    assert_eq!(tests.len(), 2);

    assert_eq!(tests[0].values(), vec![1.0, 1.5]);
    assert_eq!(tests[0].summary.state, TestState::Completed);
    assert_eq!(
        tests[0].summary.completion,
        Some(CompletionReason::Disconnected)
    );

    assert_eq!(tests[1].values(), vec![2.0]);
    assert_eq!(tests[1].summary.completion, Some(CompletionReason::Stopped));

    let stats = controller.reader_stats();
    assert_eq!(stats.connections, 2);
    assert_eq!(stats.reconnect_attempts, 1);
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(session.disconnect_reason(), Some("Stopped"));
}

#[tokio::test(start_paused = true)]
async fn test_connection_events_reach_the_callback_in_order() {
    let (feed, source) = ChannelLineSource::new(32);
    let mut controller =
        StreamController::with_source(config(reconnecting()), Box::new(source)).unwrap();

    let states = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    controller.set_event_callback(move |event| {
        if let Event::ConnectionChanged { state, .. } = event {
            sink.lock().push(*state);
        }
    });
    controller.start().unwrap();

    sleep(Duration::from_millis(150)).await;
    feed.hangup().await.unwrap();
    sleep(Duration::from_millis(350)).await;
    controller.stop().await.unwrap();

    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_source_error_is_terminal() {
    let (feed, source) = ChannelLineSource::new(8);
    let mut controller =
        StreamController::with_source(config(reconnecting()), Box::new(source)).unwrap();
    controller.start().unwrap();

    feed.line("3.0").await.unwrap();
    feed.fail("device removed").await.unwrap();

    let result = controller.wait().await;
    assert!(matches!(result, Err(StreamError::Fatal(_))));

    let session = controller.session();
    let session = session.read();
    assert_eq!(session.connection_state(), ConnectionState::Failed);
    assert!(session
        .disconnect_reason()
        .is_some_and(|reason| reason.contains("device removed")));

    // Data up to the failure stays queryable
    let test = session.get_test(1).unwrap();
    assert_eq!(test.values(), vec![3.0]);
    assert_eq!(test.summary.state, TestState::Completed);
    assert!(!controller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_max_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggerConfig {
        source: Some(SourceConfig::File {
            path: dir.path().join("missing.txt").display().to_string(),
            interval_ms: 0,
        }),
        reconnect: ReconnectPolicy {
            enabled: true,
            interval_ms: 100,
            max_attempts: Some(3),
        },
        ..config(reconnecting())
    };

    let mut controller = StreamController::new(config).unwrap();
    controller.start().unwrap();
    let result = controller.wait().await;

    assert!(matches!(result, Err(StreamError::Connection(_))));
    assert_eq!(controller.reader_stats().reconnect_attempts, 3);
    assert_eq!(controller.reader_stats().connections, 0);
    assert_eq!(
        controller.session().read().connection_state(),
        ConnectionState::Failed
    );
}

// =============================================================================
// CONSUMER SIDE
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_snapshots_are_stable_while_producer_appends() {
    let (feed, source) = ChannelLineSource::new(64);
    let mut controller =
        StreamController::with_source(config(ReconnectPolicy::disabled()), Box::new(source))
            .unwrap();
    controller.start().unwrap();

    feed.line("1.0").await.unwrap();
    sleep(Duration::from_millis(120)).await;
    let early = controller.session().read().get_test(1).unwrap();

    for value in ["2.0", "3.0", "4.0"] {
        feed.line(value).await.unwrap();
        sleep(Duration::from_millis(50)).await;
    }
    sleep(Duration::from_millis(100)).await;
    let late = controller.session().read().get_test(1).unwrap();

    assert_eq!(early.values(), vec![1.0]);
    assert_eq!(early.summary.state, TestState::Active);
    assert_eq!(late.values(), vec![1.0, 2.0, 3.0, 4.0]);

    drop(feed);
    controller.wait().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_deleting_active_test_drops_its_later_samples() {
    let (feed, source) = ChannelLineSource::new(64);
    let mut controller =
        StreamController::with_source(config(ReconnectPolicy::disabled()), Box::new(source))
            .unwrap();
    controller.start().unwrap();

    feed.line("1.0").await.unwrap();
    sleep(Duration::from_millis(120)).await;
    controller.session().write().delete_test(1).unwrap();

    feed.line("1.1").await.unwrap();
    sleep(Duration::from_millis(1000)).await;
    feed.line("9.0").await.unwrap();
    sleep(Duration::from_millis(120)).await;

    drop(feed);
    controller.wait().await.unwrap();

    let session = controller.session();
    let session = session.read();
    let tests = session.list_tests();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].id(), 2);
    assert_eq!(tests[0].values(), vec![9.0]);
    assert!(matches!(
        session.get_test(1),
        Err(StreamError::TestNotFound(1))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_independent_sessions_do_not_interfere() {
    let (feed_a, source_a) = ChannelLineSource::new(32);
    let (feed_b, source_b) = ChannelLineSource::new(32);

    let fast = LoggerConfig {
        segmentation: SegmentationConfig::fixed(Duration::from_millis(100)),
        ..config(ReconnectPolicy::disabled())
    };
    let slow = LoggerConfig {
        segmentation: SegmentationConfig::fixed(Duration::from_millis(1000)),
        ..config(ReconnectPolicy::disabled())
    };

    let mut a = StreamController::with_source(fast, Box::new(source_a)).unwrap();
    let mut b = StreamController::with_source(slow, Box::new(source_b)).unwrap();
    a.start().unwrap();
    b.start().unwrap();

    for _ in 0..4 {
        feed_a.line("1.0").await.unwrap();
        feed_b.line("2.0").await.unwrap();
        sleep(Duration::from_millis(250)).await;
    }
    drop(feed_a);
    drop(feed_b);
    a.wait().await.unwrap();
    b.wait().await.unwrap();

    assert_ne!(a.session_id(), b.session_id());
    assert_eq!(a.session().read().test_count(), 4);
    assert_eq!(b.session().read().test_count(), 1);
    assert_eq!(b.session().read().get_test(1).unwrap().stats().count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_restart_continues_test_numbering() {
    let file = {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"1.0\n1.1\n").unwrap();
        file
    };
    let config = LoggerConfig {
        source: Some(SourceConfig::File {
            path: file.path().display().to_string(),
            interval_ms: 10,
        }),
        ..config(ReconnectPolicy::disabled())
    };

    let mut controller = StreamController::new(config).unwrap();
    controller.start().unwrap();
    controller.wait().await.unwrap();
    controller.start().unwrap();
    controller.wait().await.unwrap();

    let ids: Vec<u64> = controller
        .session()
        .read()
        .summaries()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
}

// =============================================================================
// CALLBACK ORDERING
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_poll_racing_consumer_keeps_callback_order() {
    let (feed, source) = ChannelLineSource::new(64);
    let config = LoggerConfig {
        segmentation: SegmentationConfig::fixed(Duration::from_secs(10)),
        poll_interval_ms: 1,
        ..config(ReconnectPolicy::disabled())
    };
    let mut controller = StreamController::with_source(config, Box::new(source)).unwrap();

    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.set_event_callback(move |event| {
        if let Event::SampleReceived { sample, .. } = event {
            sink.lock().push(sample.value);
        }
    });
    controller.start().unwrap();

    let total = 2000;
    for i in 0..total {
        feed.line(i.to_string()).await.unwrap();
        controller.poll();
        if i % 64 == 0 {
            tokio::task::yield_now().await;
        }
    }
    drop(feed);
    controller.wait().await.unwrap();

    let expected: Vec<f64> = (0..total).map(|i| i as f64).collect();
    assert_eq!(*seen.lock(), expected);
}
