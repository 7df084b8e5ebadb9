//! Integration tests for the simulated radio.
//!
//! The connection manager's own tests lean on `SimRadio` heavily, so its
//! behavior is pinned down here first: discovery filtering, scripted
//! connect outcomes, notifications, and radio-side disconnects.

#[cfg(feature = "sim")]
mod sim {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bitchat_transport::{
        CHAT_CHARACTERISTIC, CHAT_SERVICE, CapabilityId, ConnectBehavior,
        DiscoveredPeer, Link, PeerId, Radio, SimPeer, SimRadio,
        TransportError,
    };

    fn noop() -> bitchat_transport::DisconnectHandler {
        Arc::new(|| {})
    }

    fn peer(addr: &str) -> DiscoveredPeer {
        DiscoveredPeer::new(addr, None)
    }

    #[tokio::test]
    async fn test_discover_filters_by_service() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice"));
        let mut other = SimPeer::chat("speaker");
        other.services.clear();
        radio.add_peer("BB", other);

        let found = radio
            .discover(&CHAT_SERVICE, Duration::from_secs(1))
            .await
            .expect("discover should succeed");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, PeerId::from("AA"));
        assert_eq!(found[0].name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_discover_injected_failure_fires_once() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice"));
        radio.fail_next_discovery(TransportError::DiscoveryFailed(
            "adapter off".into(),
        ));

        let first = radio.discover(&CHAT_SERVICE, Duration::from_secs(1)).await;
        let second = radio.discover(&CHAT_SERVICE, Duration::from_secs(1)).await;

        assert!(matches!(first, Err(TransportError::DiscoveryFailed(_))));
        assert_eq!(second.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_write_and_notify() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice"));

        let link = radio
            .connect(&peer("AA"), Duration::from_secs(1), noop())
            .await
            .expect("connect should succeed");
        assert!(radio.is_connected(&PeerId::from("AA")));

        let caps = link.capabilities().await.unwrap();
        assert!(caps.contains(&CHAT_CHARACTERISTIC));

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        link.subscribe(
            &CHAT_CHARACTERISTIC,
            Arc::new(move |data| sink.lock().unwrap().push(data)),
        )
        .await
        .unwrap();

        link.write(&CHAT_CHARACTERISTIC, b"hi", false).await.unwrap();
        assert_eq!(radio.written(&PeerId::from("AA")), vec![b"hi".to_vec()]);

        assert!(radio.notify(&PeerId::from("AA"), b"yo"));
        assert_eq!(*received.lock().unwrap(), vec![b"yo".to_vec()]);
    }

    #[tokio::test]
    async fn test_connect_refused_counts_attempt() {
        let radio = SimRadio::new();
        radio.add_peer(
            "AA",
            SimPeer::chat("alice").with_connect(ConnectBehavior::Refuse),
        );

        let result = radio
            .connect(&peer("AA"), Duration::from_secs(1), noop())
            .await;

        assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
        assert_eq!(radio.connect_attempts(&PeerId::from("AA")), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_hang_only_ends_by_timeout() {
        let radio = SimRadio::new();
        radio.add_peer(
            "AA",
            SimPeer::chat("alice").with_connect(ConnectBehavior::Hang),
        );

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            radio.connect(&peer("AA"), Duration::from_secs(5), noop()),
        )
        .await;

        assert!(result.is_err(), "hanging connect should time out");
        assert!(!radio.is_connected(&PeerId::from("AA")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_capabilities_and_disconnect_take_their_delay() {
        let radio = SimRadio::new();
        radio.add_peer(
            "AA",
            SimPeer::chat("alice")
                .with_slow_capabilities(Duration::from_secs(5))
                .with_slow_disconnect(Duration::from_secs(2)),
        );
        let link = radio
            .connect(&peer("AA"), Duration::from_secs(1), noop())
            .await
            .unwrap();
        let start = tokio::time::Instant::now();

        assert!(link.capabilities().await.unwrap().contains(&CHAT_CHARACTERISTIC));
        assert_eq!(start.elapsed(), Duration::from_secs(5));

        link.disconnect().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(7));
        assert!(!radio.is_connected(&PeerId::from("AA")));
    }

    #[tokio::test]
    async fn test_drop_link_fires_disconnect_handler_once() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice"));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let link = radio
            .connect(
                &peer("AA"),
                Duration::from_secs(1),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();

        assert!(radio.drop_link(&PeerId::from("AA")));
        assert!(!radio.drop_link(&PeerId::from("AA")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let write = link.write(&CHAT_CHARACTERISTIC, b"late", false).await;
        assert!(matches!(write, Err(TransportError::ConnectionClosed(_))));
    }

    #[tokio::test]
    async fn test_caller_disconnect_does_not_fire_handler() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice"));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let link = radio
            .connect(
                &peer("AA"),
                Duration::from_secs(1),
                Arc::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .await
            .unwrap();
        link.disconnect().await.unwrap();
        link.disconnect().await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!radio.is_connected(&PeerId::from("AA")));
    }

    #[tokio::test]
    async fn test_impostor_rejects_chat_subscription() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::impostor("printer"));

        let link = radio
            .connect(&peer("AA"), Duration::from_secs(1), noop())
            .await
            .unwrap();

        assert!(link.capabilities().await.unwrap().is_empty());
        let result = link
            .subscribe(&CapabilityId::new(CHAT_CHARACTERISTIC.as_str()), Arc::new(|_| {}))
            .await;
        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_failing_writes_are_not_recorded() {
        let radio = SimRadio::new();
        radio.add_peer("AA", SimPeer::chat("alice").with_failing_writes());

        let link = radio
            .connect(&peer("AA"), Duration::from_secs(1), noop())
            .await
            .unwrap();
        let result = link.write(&CHAT_CHARACTERISTIC, b"x", false).await;

        assert!(matches!(result, Err(TransportError::WriteFailed(_))));
        assert!(radio.written(&PeerId::from("AA")).is_empty());
    }
}
