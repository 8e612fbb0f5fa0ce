//! Integration tests for the sidebar orchestrator.
//!
//! # Purpose
//!
//! These tests run a simulated host page and simulated guest frames in the
//! same process as a `FrameSyncService` and check, through the public API
//! only, that:
//!
//! - The sidebar finds the host, and guests reach the sidebar through the
//!   host's port provider.
//! - Inbound calls surface as `FrameSyncEvent`s and outbound calls reach the
//!   right frame, with guests only ever seeing tags and selectors.
//! - `close` tears a channel down, persistent guests are retained, and a
//!   reconnect under the same `sourceId` supersedes the old channel.
//! - A replaced host or extension channel cannot tear down its successor
//!   with calls it left queued.
//! - Discovery can be bounded by the configured timeout.

use std::sync::Arc;
use std::time::Duration;

use framesync_core::{
    message_channel, DiscoveryMessage, FrameRole, FrameWindow, MessageEvent, PortFinder,
    PortProvider, PortRpc, ProviderEvent,
};
use framesync_sidebar::application::frame_sync::{FrameSyncError, FrameSyncEvent, FrameSyncService};
use framesync_sidebar::application::guest_registry::{DocumentInfo, GuestState};
use framesync_sidebar::domain::config::FrameSyncConfig;
use framesync_sidebar::domain::events::{
    ExtensionToSidebar, GuestToSidebar, HostToSidebar, SidebarToExtension, SidebarToGuest,
    SidebarToHost, SidebarToSite, SiteToSidebar,
};
use framesync_sidebar::infrastructure::simulated_frames::{SimulatedGuest, SimulatedHost};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};

// ── Helpers ───────────────────────────────────────────────────────────────────

fn fast_config() -> FrameSyncConfig {
    let mut cfg = FrameSyncConfig::default();
    cfg.discovery.retry_interval_ms = 20;
    cfg
}

fn document(uri: &str, persistent: bool) -> DocumentInfo {
    DocumentInfo {
        uri: uri.to_string(),
        frame_identifier: None,
        persistent,
    }
}

struct Setup {
    host_window: FrameWindow,
    sidebar_window: FrameWindow,
    host: SimulatedHost,
    host_calls: mpsc::UnboundedReceiver<(SidebarToHost, Vec<Value>)>,
    sync: FrameSyncService,
    events: mpsc::Receiver<FrameSyncEvent>,
}

/// Host + sidebar, connected, with the `HostConnected` event consumed.
async fn connected() -> Setup {
    let host_window = FrameWindow::new("host");
    let sidebar_window = FrameWindow::new("sidebar");
    let (mut sync, mut events) =
        FrameSyncService::new(fast_config(), sidebar_window.clone(), host_window.clone());
    let (host, host_calls) = SimulatedHost::start(host_window.clone(), sidebar_window.clone());

    tokio::time::timeout(Duration::from_secs(2), sync.connect())
        .await
        .expect("host discovered")
        .expect("connect succeeds");
    assert_eq!(events.recv().await, Some(FrameSyncEvent::HostConnected));

    Setup {
        host_window,
        sidebar_window,
        host,
        host_calls,
        sync,
        events,
    }
}

/// Drives the service until it emits the next event.
async fn next_event(
    sync: &mut FrameSyncService,
    events: &mut mpsc::Receiver<FrameSyncEvent>,
) -> FrameSyncEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(event) = events.try_recv() {
                return event;
            }
            assert!(sync.process_next().await, "frame sync stopped");
        }
    })
    .await
    .expect("event within 2s")
}

/// Asserts that no event is emitted for a short while.
async fn assert_quiet(sync: &mut FrameSyncService, events: &mut mpsc::Receiver<FrameSyncEvent>) {
    let waited =
        tokio::time::timeout(Duration::from_millis(100), next_event(sync, events)).await;
    assert!(waited.is_err(), "unexpected event: {:?}", waited.ok());
}

// ── Host and guests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_guest_connects_reports_document_and_receives_projected_annotations() {
    // Arrange
    let Setup {
        host_window,
        mut host_calls,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (_guest, mut guest_calls) =
        SimulatedGuest::start(host_window, "g1", document("https://example.com/a", false));

    // Act: connection and the guest's first call
    let connected = next_event(&mut sync, &mut events).await;
    let reported = next_event(&mut sync, &mut events).await;

    // Assert
    assert_eq!(
        connected,
        FrameSyncEvent::GuestConnected {
            source_id: "g1".into(),
            restored: false
        }
    );
    assert!(matches!(
        reported,
        FrameSyncEvent::GuestCall { ref source_id, method: GuestToSidebar::DocumentInfoChanged, .. }
            if source_id == "g1"
    ));
    let entry = sync.registry().get("g1").expect("registered");
    assert_eq!(entry.document.as_ref().unwrap().uri, "https://example.com/a");

    // The initial projection is empty.
    let (method, args) = guest_calls.recv().await.unwrap();
    assert_eq!(method, SidebarToGuest::LoadAnnotations);
    assert_eq!(args, vec![json!([])]);

    // Act: load annotations with private fields
    sync.load_annotations(&[json!({
        "$tag": "t1",
        "text": "secret",
        "user": "acct:bob@example.com",
        "uri": "https://example.com/a",
        "target": [{"selector": []}],
    })]);
    sync.call_host(SidebarToHost::OpenSidebar, vec![]);

    // Assert: guests only get tag, target and uri
    let (method, args) = guest_calls.recv().await.unwrap();
    assert_eq!(method, SidebarToGuest::LoadAnnotations);
    assert_eq!(
        args,
        vec![json!([{"$tag": "t1", "target": [{"selector": []}], "uri": "https://example.com/a"}])]
    );
    assert_eq!(
        host_calls.recv().await.unwrap(),
        (SidebarToHost::OpenSidebar, vec![])
    );
}

#[tokio::test]
async fn test_guest_calls_are_forwarded_as_events() {
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (guest, _calls) =
        SimulatedGuest::start(host_window, "g1", document("https://example.com/a", false));
    next_event(&mut sync, &mut events).await; // GuestConnected
    next_event(&mut sync, &mut events).await; // documentInfoChanged

    guest.call_sidebar(GuestToSidebar::ShowAnnotations, vec![json!(["t1", "t2"])]);

    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::GuestCall {
            source_id: "g1".into(),
            method: GuestToSidebar::ShowAnnotations,
            args: vec![json!(["t1", "t2"])],
        }
    );
}

#[tokio::test]
async fn test_non_persistent_guest_is_discarded_on_close() {
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (guest, _calls) =
        SimulatedGuest::start(host_window, "g1", document("https://example.com/a", false));
    next_event(&mut sync, &mut events).await;
    next_event(&mut sync, &mut events).await;

    guest.unload().await;

    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::GuestDisconnected {
            source_id: "g1".into(),
            retained: false
        }
    );
    assert!(sync.connected_guests().is_empty());
    assert!(sync.registry().get("g1").is_none());
    assert!(!sync.call_guest("g1", SidebarToGuest::ScrollToAnnotation, vec![json!("t1")]));
}

#[tokio::test]
async fn test_persistent_guest_is_retained_and_restored_on_reconnect() {
    // Arrange
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (guest, _calls) = SimulatedGuest::start(
        host_window.clone(),
        "pdf",
        document("https://example.com/book.pdf", true),
    );
    next_event(&mut sync, &mut events).await;
    next_event(&mut sync, &mut events).await;

    // Act: the frame reloads
    guest.unload().await;
    let closed = next_event(&mut sync, &mut events).await;
    let state_while_away = sync.registry().get("pdf").map(|g| g.state);
    let (_again, _calls) = SimulatedGuest::start(
        host_window,
        "pdf",
        document("https://example.com/book.pdf", true),
    );
    let reopened = next_event(&mut sync, &mut events).await;

    // Assert
    assert_eq!(
        closed,
        FrameSyncEvent::GuestDisconnected {
            source_id: "pdf".into(),
            retained: true
        }
    );
    assert_eq!(state_while_away, Some(GuestState::Disconnected));
    assert_eq!(
        reopened,
        FrameSyncEvent::GuestConnected {
            source_id: "pdf".into(),
            restored: true
        }
    );
}

#[tokio::test]
async fn test_reconnect_with_same_source_id_supersedes_old_channel() {
    // Arrange: first instance fully connected
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (first, _first_calls) =
        SimulatedGuest::start(host_window.clone(), "dup", document("https://example.com/1", false));
    next_event(&mut sync, &mut events).await;
    next_event(&mut sync, &mut events).await;

    // Act: a second instance under the same id
    let (_second, mut second_calls) =
        SimulatedGuest::start(host_window, "dup", document("https://example.com/2", false));
    let event = next_event(&mut sync, &mut events).await;
    next_event(&mut sync, &mut events).await; // second documentInfoChanged

    // Assert: one channel, and it is the new one
    assert!(matches!(event, FrameSyncEvent::GuestConnected { ref source_id, .. } if source_id == "dup"));
    assert_eq!(sync.connected_guests(), vec!["dup".to_string()]);
    assert!(sync.call_guest("dup", SidebarToGuest::ScrollToAnnotation, vec![json!("t9")]));
    let (initial, _) = second_calls.recv().await.unwrap();
    assert_eq!(initial, SidebarToGuest::LoadAnnotations);
    assert_eq!(
        second_calls.recv().await.unwrap(),
        (SidebarToGuest::ScrollToAnnotation, vec![json!("t9")])
    );

    // Act: the superseded instance unloads; it must not tear down the new channel
    first.unload().await;
    assert_quiet(&mut sync, &mut events).await;
    assert_eq!(sync.connected_guests(), vec!["dup".to_string()]);
}

#[tokio::test]
async fn test_offer_from_other_window_is_ignored() {
    let Setup {
        sidebar_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (port, _peer) = message_channel();
    let offer = DiscoveryMessage::request(FrameRole::Guest, FrameRole::Sidebar, "x", Some("evil".into()))
        .to_offer();

    sidebar_window.post_message(
        MessageEvent::new(offer.to_value())
            .with_source(FrameWindow::new("impostor"))
            .with_ports(vec![port]),
    );

    assert_quiet(&mut sync, &mut events).await;
    assert!(sync.connected_guests().is_empty());
}

#[tokio::test]
async fn test_guest_without_source_id_uses_configured_default() {
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let finder = PortFinder::new(host_window, FrameWindow::new("bare-guest"), FrameRole::Guest);

    let _port = finder.discover(FrameRole::Sidebar).await.unwrap();

    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::GuestConnected {
            source_id: "main".into(),
            restored: false
        }
    );
}

// ── Host lifecycle ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_host_close_disconnects_host_channel() {
    let Setup {
        mut host,
        mut sync,
        mut events,
        ..
    } = connected().await;
    assert!(sync.is_host_connected());

    host.shutdown();

    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::HostDisconnected
    );
    assert!(!sync.is_host_connected());
}

#[tokio::test]
async fn test_reconnected_host_ignores_calls_queued_by_previous_host() {
    // Arrange: a bare provider, so the test holds the host's end of each channel.
    let host_window = FrameWindow::new("host");
    let sidebar_window = FrameWindow::new("sidebar");
    let (mut sync, mut events) =
        FrameSyncService::new(fast_config(), sidebar_window.clone(), host_window.clone());
    let (provider, mut provided) = PortProvider::new(host_window, sidebar_window);
    let provider = Arc::new(provider);
    let listening = Arc::clone(&provider);
    tokio::spawn(async move { listening.listen().await });

    sync.connect().await.expect("first connect");
    assert_eq!(events.recv().await, Some(FrameSyncEvent::HostConnected));
    let Some(ProviderEvent::FrameConnected { port, .. }) = provided.recv().await else {
        panic!("provider stopped");
    };
    let old_host: PortRpc<SidebarToHost, HostToSidebar> = PortRpc::new("old host");
    old_host.connect(port);

    // Act: the old host closes and keeps sending; everything lands in the queue.
    old_host.call(HostToSidebar::Close, vec![]);
    old_host.call(HostToSidebar::SetHighlightsVisible, vec![json!(true)]);
    old_host.call(HostToSidebar::Close, vec![]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::HostDisconnected
    );

    tokio::time::timeout(Duration::from_secs(2), sync.connect())
        .await
        .expect("host rediscovered")
        .expect("second connect");
    assert_eq!(events.recv().await, Some(FrameSyncEvent::HostConnected));
    let Some(ProviderEvent::FrameConnected { port, .. }) = provided.recv().await else {
        panic!("provider stopped");
    };
    let new_host: PortRpc<SidebarToHost, HostToSidebar> = PortRpc::new("new host");
    let (tx, mut opened) = mpsc::unbounded_channel();
    new_host.on(SidebarToHost::OpenSidebar, move |args| {
        let _ = tx.send(args);
    });
    new_host.connect(port);

    // Assert: the leftovers are dropped and the new channel works both ways
    assert_quiet(&mut sync, &mut events).await;
    assert!(sync.is_host_connected());
    new_host.call(HostToSidebar::SetHighlightsVisible, vec![json!(false)]);
    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::HostCall {
            method: HostToSidebar::SetHighlightsVisible,
            args: vec![json!(false)]
        }
    );
    sync.call_host(SidebarToHost::OpenSidebar, vec![]);
    assert_eq!(opened.recv().await, Some(vec![]));
    provider.destroy();
}

#[tokio::test]
async fn test_second_connect_is_rejected() {
    let Setup { mut sync, host: _host, .. } = connected().await;
    assert_eq!(sync.connect().await, Err(FrameSyncError::AlreadyConnected));
}

#[tokio::test]
async fn test_zero_retry_interval_in_config_still_connects() {
    let host_window = FrameWindow::new("host");
    let sidebar_window = FrameWindow::new("sidebar");
    let mut cfg = FrameSyncConfig::default();
    cfg.discovery.retry_interval_ms = 0;
    let (mut sync, mut events) =
        FrameSyncService::new(cfg, sidebar_window.clone(), host_window.clone());
    let (_host, _host_calls) = SimulatedHost::start(host_window, sidebar_window);

    tokio::time::timeout(Duration::from_secs(2), sync.connect())
        .await
        .expect("host discovered")
        .expect("connect succeeds");

    assert_eq!(events.recv().await, Some(FrameSyncEvent::HostConnected));
}

#[tokio::test(start_paused = true)]
async fn test_connect_times_out_without_host() {
    let mut cfg = FrameSyncConfig::default();
    cfg.discovery.timeout_ms = Some(1_000);
    let (mut sync, _events) =
        FrameSyncService::new(cfg, FrameWindow::new("sidebar"), FrameWindow::new("host"));

    let result = sync.connect().await;

    assert_eq!(
        result,
        Err(FrameSyncError::DiscoveryTimeout(Duration::from_millis(1_000)))
    );
}

// ── Site and extension ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_site_frame_connects_and_exchanges_calls() {
    // Arrange
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let finder = PortFinder::new(host_window, FrameWindow::new("site"), FrameRole::Site);
    let port = finder.discover(FrameRole::Sidebar).await.unwrap();
    let site: PortRpc<SidebarToSite, SiteToSidebar> = PortRpc::new("site→sidebar");
    let (seek_tx, mut seek_rx) = mpsc::unbounded_channel();
    site.on(SidebarToSite::SeekTo, move |args| {
        let _ = seek_tx.send(args);
    });
    site.connect(port);

    // Act
    let connected = next_event(&mut sync, &mut events).await;
    site.call(SiteToSidebar::MediaTimeChanged, vec![json!(12.5)]);
    let call = next_event(&mut sync, &mut events).await;
    assert!(sync.call_site(SidebarToSite::SeekTo, vec![json!(3)]));

    // Assert
    assert_eq!(connected, FrameSyncEvent::SiteConnected);
    assert_eq!(
        call,
        FrameSyncEvent::SiteCall {
            method: SiteToSidebar::MediaTimeChanged,
            args: vec![json!(12.5)]
        }
    );
    assert_eq!(seek_rx.recv().await.unwrap(), vec![json!(3)]);

    // Act: the site frame goes away
    site.destroy();
    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::SiteDisconnected
    );
    assert!(!sync.is_site_connected());
}

#[tokio::test]
async fn test_extension_receives_queued_calls_then_recording_state() {
    // Arrange
    let (mut sync, mut events) = FrameSyncService::new(
        FrameSyncConfig::default(),
        FrameWindow::new("sidebar"),
        FrameWindow::new("host"),
    );
    let (sidebar_end, extension_end) = message_channel();
    let extension: PortRpc<SidebarToExtension, ExtensionToSidebar> = PortRpc::new("extension");
    let (tx, mut rx) = mpsc::unbounded_channel();
    extension.on(SidebarToExtension::RecordingStateChanged, move |args| {
        let _ = tx.send(args);
    });

    // Act
    sync.call_extension(SidebarToExtension::RecordingStateChanged, vec![json!("queued")]);
    sync.connect_extension(sidebar_end, true).await;
    extension.connect(extension_end);

    // Assert
    assert_eq!(events.recv().await, Some(FrameSyncEvent::ExtensionConnected));
    assert_eq!(rx.recv().await.unwrap(), vec![json!("queued")]);
    assert_eq!(rx.recv().await.unwrap(), vec![json!(true)]);
    assert!(sync.recording());

    extension.call(ExtensionToSidebar::ToggleRecording, vec![]);
    assert_eq!(
        next_event(&mut sync, &mut events).await,
        FrameSyncEvent::ExtensionCall {
            method: ExtensionToSidebar::ToggleRecording,
            args: vec![]
        }
    );

    sync.set_recording(false);
    assert_eq!(rx.recv().await.unwrap(), vec![json!(false)]);
}

#[tokio::test]
async fn test_replaced_extension_close_does_not_tear_down_new_channel() {
    // Arrange
    let (mut sync, mut events) = FrameSyncService::new(
        FrameSyncConfig::default(),
        FrameWindow::new("sidebar"),
        FrameWindow::new("host"),
    );
    let (sidebar_end, extension_end) = message_channel();
    let first: PortRpc<SidebarToExtension, ExtensionToSidebar> = PortRpc::new("extension-1");
    first.connect(extension_end);
    sync.connect_extension(sidebar_end, false).await;
    assert_eq!(events.recv().await, Some(FrameSyncEvent::ExtensionConnected));

    // Act: the first extension closes, and is replaced before the close is handled.
    first.destroy();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (sidebar_end, extension_end) = message_channel();
    let second: PortRpc<SidebarToExtension, ExtensionToSidebar> = PortRpc::new("extension-2");
    let (tx, mut rx) = mpsc::unbounded_channel();
    second.on(SidebarToExtension::RecordingStateChanged, move |args| {
        let _ = tx.send(args);
    });
    second.connect(extension_end);
    sync.connect_extension(sidebar_end, true).await;
    assert_eq!(events.recv().await, Some(FrameSyncEvent::ExtensionConnected));

    // Assert
    assert_quiet(&mut sync, &mut events).await;
    assert!(sync.is_extension_connected());
    assert_eq!(rx.recv().await.unwrap(), vec![json!(true)]);
    sync.set_recording(false);
    assert_eq!(rx.recv().await.unwrap(), vec![json!(false)]);
}

// ── Shutdown ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_run_stops_on_shutdown_and_destroys_channels() {
    // Arrange
    let Setup {
        host_window,
        mut sync,
        mut events,
        host: _host,
        ..
    } = connected().await;
    let (_guest, _calls) =
        SimulatedGuest::start(host_window, "g1", document("https://example.com/a", false));
    next_event(&mut sync, &mut events).await;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Act
    let stopper = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send_replace(true);
    };
    tokio::time::timeout(Duration::from_secs(2), async {
        tokio::join!(sync.run(shutdown_rx), stopper)
    })
    .await
    .expect("run returns after shutdown");

    // Assert
    assert!(!sync.is_host_connected());
    assert!(sync.connected_guests().is_empty());
    assert!(!sync.process_next().await);
}
