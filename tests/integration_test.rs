//! Integration tests for the link lifecycle against in-memory adapters.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

use spp_link::{
    Capability, ConnectionState, DeviceDescriptor, InboundChannel, InboundEvent, LinkError,
    LinkHandle, LinkManager, LinkResult, MessageKind, PermissionGate, PermissionPlatform,
    PermissionPrompter, RadioAdapter,
};

struct MockLink {
    device: DeviceDescriptor,
    events: InboundChannel,
    written: Mutex<Vec<Vec<u8>>>,
    connected: AtomicBool,
    fail_writes: AtomicBool,
    fail_disconnect: AtomicBool,
    subscriptions: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockLink {
    fn new(device: DeviceDescriptor) -> Arc<Self> {
        Arc::new(Self {
            device,
            events: InboundChannel::new(16),
            written: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            fail_disconnect: AtomicBool::new(false),
            subscriptions: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    fn inject(&self, event: InboundEvent) {
        self.events.send(event);
    }

    fn listeners(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl LinkHandle for MockLink {
    fn device(&self) -> DeviceDescriptor {
        self.device.clone()
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn write(&self, data: &[u8]) -> LinkResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LinkError::TransportWriteFailed("broken pipe".to_string()));
        }
        self.written.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(LinkError::Adapter("socket already gone".to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.events.subscribe()
    }
}

#[derive(Default)]
struct MockAdapter {
    bonded: Vec<DeviceDescriptor>,
    discovered: Vec<DeviceDescriptor>,
    disabled: bool,
    decline_enable: bool,
    pair_error: Option<LinkError>,
    connect_error: Option<LinkError>,
    banner: Option<Vec<u8>>,
    open_link: Mutex<Option<Arc<MockLink>>>,
    links: Mutex<Vec<Arc<MockLink>>>,
    calls: Mutex<Vec<&'static str>>,
}

impl MockAdapter {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn last_link(&self) -> Arc<MockLink> {
        self.links.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl RadioAdapter for MockAdapter {
    async fn list_bonded(&self) -> LinkResult<Vec<DeviceDescriptor>> {
        self.record("list_bonded");
        Ok(self.bonded.clone())
    }

    async fn is_enabled(&self) -> LinkResult<bool> {
        self.record("is_enabled");
        Ok(!self.disabled)
    }

    async fn request_enabled(&self) -> LinkResult<bool> {
        self.record("request_enabled");
        Ok(!self.decline_enable)
    }

    async fn discover(&self, _timeout: Duration) -> LinkResult<Vec<DeviceDescriptor>> {
        self.record("discover");
        Ok(self.discovered.clone())
    }

    async fn pair(&self, id: &str) -> LinkResult<DeviceDescriptor> {
        self.record("pair");
        if let Some(e) = &self.pair_error {
            return Err(e.clone());
        }
        let device = self
            .discovered
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .unwrap();
        Ok(DeviceDescriptor { bonded: true, ..device })
    }

    async fn connect(&self, id: &str) -> LinkResult<Arc<dyn LinkHandle>> {
        self.record("connect");
        if let Some(e) = &self.connect_error {
            return Err(e.clone());
        }
        let device = self
            .bonded
            .iter()
            .chain(self.discovered.iter())
            .find(|d| d.id == id)
            .cloned()
            .unwrap();
        let link = MockLink::new(device);
        if let Some(banner) = &self.banner {
            link.inject(InboundEvent::Data(banner.clone()));
        }
        self.links.lock().unwrap().push(link.clone());
        *self.open_link.lock().unwrap() = Some(link.clone());
        Ok(link)
    }

    async fn connected(&self, id: &str) -> LinkResult<Option<Arc<dyn LinkHandle>>> {
        self.record("connected");
        let link = self.open_link.lock().unwrap().clone();
        match link {
            Some(link) if link.device.id == id && link.connected.load(Ordering::SeqCst) => {
                let link: Arc<dyn LinkHandle> = link;
                Ok(Some(link))
            }
            _ => Ok(None),
        }
    }
}

struct PartialGrant {
    requests: Arc<AtomicUsize>,
}

#[async_trait]
impl PermissionPrompter for PartialGrant {
    async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<Vec<Capability>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(capabilities
            .iter()
            .copied()
            .filter(|c| *c != Capability::BluetoothConnect)
            .collect())
    }
}

fn player() -> DeviceDescriptor {
    DeviceDescriptor::new("00:11:22:33:44:55", "MP4-Player-1", true)
}

fn discovered_player() -> DeviceDescriptor {
    DeviceDescriptor::new("66:77:88:99:AA:BB", "MP4-X", false)
}

fn headset() -> DeviceDescriptor {
    DeviceDescriptor::new("10:20:30:40:50:60", "Headset", true)
}

fn manager(adapter: &Arc<MockAdapter>) -> LinkManager {
    let radio: Arc<dyn RadioAdapter> = adapter.clone();
    LinkManager::new(radio, PermissionGate::unrestricted())
}

/// Let spawned listener tasks run.
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn kinds(manager: &LinkManager) -> Vec<MessageKind> {
    manager.messages().iter().map(|m| m.kind).collect()
}

#[tokio::test]
async fn test_bonded_match_connects_without_discovery() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![headset(), player()],
        ..Default::default()
    });
    let manager = manager(&adapter);

    let device = manager.find_and_connect("MP4").await.unwrap();

    assert_eq!(device, player());
    assert_eq!(adapter.calls(), vec!["list_bonded", "connected", "connect"]);
    assert_eq!(manager.status(), ConnectionState::Connected(player()));
    assert_eq!(manager.target_device(), Some(player()));
    assert_eq!(kinds(&manager), vec![MessageKind::System]);
    assert!(manager.messages()[0].content.contains("MP4-Player-1"));
}

#[tokio::test]
async fn test_discovery_path_enables_discovers_pairs_connects() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![headset()],
        discovered: vec![discovered_player()],
        disabled: true,
        ..Default::default()
    });
    let manager = manager(&adapter);

    let device = manager.find_and_connect("MP4").await.unwrap();

    assert_eq!(device.id, discovered_player().id);
    assert!(device.bonded);
    assert_eq!(
        adapter.calls(),
        vec![
            "list_bonded",
            "is_enabled",
            "request_enabled",
            "discover",
            "pair",
            "connected",
            "connect"
        ]
    );

    let messages = manager.messages();
    assert!(messages.iter().all(|m| m.kind == MessageKind::System));
    let pairing = messages
        .iter()
        .position(|m| m.content.starts_with("Pairing with MP4-X"))
        .unwrap();
    let connected = messages
        .iter()
        .position(|m| m.content.starts_with("Connected to MP4-X"))
        .unwrap();
    assert!(pairing < connected);
    assert!(matches!(manager.status(), ConnectionState::Connected(_)));
}

#[tokio::test]
async fn test_enabled_adapter_is_not_prompted() {
    let adapter = Arc::new(MockAdapter {
        discovered: vec![discovered_player()],
        ..Default::default()
    });
    let manager = manager(&adapter);

    manager.find_and_connect("MP4").await.unwrap();
    assert!(!adapter.calls().contains(&"request_enabled"));
}

#[tokio::test]
async fn test_no_match_fails_and_leaves_disconnected() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![headset()],
        discovered: vec![DeviceDescriptor::new("AA", "Speaker", false)],
        ..Default::default()
    });
    let manager = manager(&adapter);

    let err = manager.find_and_connect("MP4").await.unwrap_err();

    assert_eq!(
        err,
        LinkError::TargetNotFound {
            prefix: "MP4".to_string()
        }
    );
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    let snapshot = manager.snapshot();
    assert!(!snapshot.is_scanning);
    assert!(!snapshot.is_connected);
    assert_eq!(snapshot.last_error, Some(err.to_string()));
    assert!(manager.messages().is_empty());
    assert!(!adapter.calls().contains(&"pair"));
}

#[tokio::test]
async fn test_prefix_match_is_case_sensitive() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![DeviceDescriptor::new("01", "mp4-lowercase", true)],
        ..Default::default()
    });
    let manager = manager(&adapter);

    let err = manager.find_and_connect("MP4").await.unwrap_err();
    assert!(matches!(err, LinkError::TargetNotFound { .. }));
}

#[tokio::test]
async fn test_declined_enable_aborts_before_discovery() {
    let adapter = Arc::new(MockAdapter {
        discovered: vec![discovered_player()],
        disabled: true,
        decline_enable: true,
        ..Default::default()
    });
    let manager = manager(&adapter);

    let err = manager.find_and_connect("MP4").await.unwrap_err();

    assert_eq!(err, LinkError::AdapterDisabled);
    assert!(!adapter.calls().contains(&"discover"));
    assert_eq!(manager.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_pair_failure_propagates_unchanged() {
    let rejection = LinkError::PairRejected {
        device: discovered_player().id,
        reason: "Authentication Rejected".to_string(),
    };
    let adapter = Arc::new(MockAdapter {
        discovered: vec![discovered_player()],
        pair_error: Some(rejection.clone()),
        ..Default::default()
    });
    let manager = manager(&adapter);

    let err = manager.find_and_connect("MP4").await.unwrap_err();

    assert_eq!(err, rejection);
    assert!(!adapter.calls().contains(&"connect"));
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(!manager.snapshot().is_pairing);
    // The resolved target survives the failure for a later retry.
    assert_eq!(manager.target_device(), Some(discovered_player()));
}

#[tokio::test]
async fn test_connect_failure_propagates_unchanged() {
    let failure = LinkError::ConnectFailed {
        device: player().id,
        reason: "Host is down".to_string(),
    };
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        connect_error: Some(failure.clone()),
        ..Default::default()
    });
    let manager = manager(&adapter);

    assert_eq!(manager.connect(&player()).await.unwrap_err(), failure);
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(!manager.snapshot().is_connecting);
    assert!(manager.messages().is_empty());
    assert_eq!(manager.last_error(), Some(failure.to_string()));
}

#[tokio::test]
async fn test_send_without_session_returns_false() {
    let adapter = Arc::new(MockAdapter::default());
    let manager = manager(&adapter);

    assert!(!manager.send(b"PLAY").await);
    assert!(manager.messages().is_empty());
    assert_eq!(
        manager.try_send(b"PLAY").await.unwrap_err(),
        LinkError::NoActiveConnection
    );
}

#[tokio::test]
async fn test_send_appends_sent_message() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();

    assert!(manager.send(b"VOL+\r\n").await);

    let link = adapter.last_link();
    assert_eq!(link.written.lock().unwrap().as_slice(), &[b"VOL+\r\n".to_vec()]);
    let messages = manager.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].kind, MessageKind::Sent);
    assert_eq!(messages[1].content, "VOL+\r\n");
}

#[tokio::test]
async fn test_send_failure_is_reported_as_false() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();
    adapter.last_link().fail_writes.store(true, Ordering::SeqCst);

    assert!(!manager.send(b"PLAY").await);
    assert_eq!(kinds(&manager), vec![MessageKind::System]);
    assert!(manager.last_error().unwrap().contains("broken pipe"));
    assert!(manager.is_connected());
}

#[tokio::test]
async fn test_inbound_bytes_append_received_messages() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();

    let link = adapter.last_link();
    assert_eq!(link.subscriptions.load(Ordering::SeqCst), 1);
    link.inject(InboundEvent::Data(b"TRACK 1".to_vec()));
    link.inject(InboundEvent::Data(b"TRACK 2".to_vec()));
    settle().await;

    let messages = manager.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1].kind, MessageKind::Received);
    assert_eq!(messages[1].content, "TRACK 1");
    assert_eq!(messages[2].content, "TRACK 2");
    assert!(manager.is_listening().await);
}

#[tokio::test]
async fn test_read_error_is_logged_not_propagated() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();

    adapter
        .last_link()
        .inject(InboundEvent::Error("Connection reset by peer".to_string()));
    settle().await;

    let last = manager.messages().pop().unwrap();
    assert_eq!(last.kind, MessageKind::System);
    assert!(last.content.contains("Connection reset by peer"));
    assert!(manager.last_error().unwrap().starts_with("Read failed"));
    assert!(!manager.is_listening().await);
    assert!(!manager.is_connected());
    assert_eq!(manager.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_bytes_sent_on_open_are_received() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        banner: Some(b"READY\r\n".to_vec()),
        ..Default::default()
    });
    let manager = manager(&adapter);

    manager.connect(&player()).await.unwrap();
    settle().await;

    let messages = manager.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].kind, MessageKind::Received);
    assert_eq!(messages[1].content, "READY\r\n");
}

#[tokio::test]
async fn test_remote_close_marks_link_lost() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();
    let link = adapter.last_link();

    link.inject(InboundEvent::Closed);
    settle().await;

    assert!(!manager.is_connected());
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(!manager.snapshot().is_connected);
    assert!(manager
        .messages()
        .last()
        .unwrap()
        .content
        .starts_with("Connection closed by"));

    // The session is still installed, so disconnect tears it down.
    manager.disconnect().await;
    assert_eq!(link.disconnects.load(Ordering::SeqCst), 1);
    assert!(manager.messages().is_empty());
}

#[tokio::test]
async fn test_disconnect_clears_session_and_log() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();
    let link = adapter.last_link();

    manager.send(b"PLAY").await;
    link.inject(InboundEvent::Data(b"OK".to_vec()));
    settle().await;
    assert_eq!(manager.messages().len(), 3);

    manager.disconnect().await;
    settle().await;

    assert!(!manager.is_connected());
    assert!(manager.messages().is_empty());
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert_eq!(link.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(link.listeners(), 0);

    // Late bytes from the old link go nowhere.
    link.inject(InboundEvent::Data(b"LATE".to_vec()));
    settle().await;
    assert!(manager.messages().is_empty());

    // Second disconnect is a no-op.
    manager.disconnect().await;
    assert_eq!(link.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disconnect_failure_is_swallowed() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();
    adapter
        .last_link()
        .fail_disconnect
        .store(true, Ordering::SeqCst);

    manager.disconnect().await;

    assert!(!manager.is_connected());
    assert!(manager.messages().is_empty());
    assert!(manager.last_error().unwrap().contains("socket already gone"));
}

#[tokio::test]
async fn test_partial_permission_grant_blocks_every_gated_operation() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        discovered: vec![discovered_player()],
        ..Default::default()
    });
    let requests = Arc::new(AtomicUsize::new(0));
    let gate = PermissionGate::new(
        PermissionPlatform::Versioned { api_level: 33 },
        Box::new(PartialGrant {
            requests: requests.clone(),
        }),
    );
    let radio: Arc<dyn RadioAdapter> = adapter.clone();
    let manager = LinkManager::new(radio, gate);

    assert!(!manager.ensure_permissions().await);
    assert!(!manager.snapshot().permission_granted);

    assert_eq!(
        manager.find_and_connect("MP4").await.unwrap_err(),
        LinkError::PermissionDenied
    );
    assert_eq!(
        manager.pair(&discovered_player()).await.unwrap_err(),
        LinkError::PermissionDenied
    );
    assert_eq!(
        manager.connect(&player()).await.unwrap_err(),
        LinkError::PermissionDenied
    );
    assert_eq!(
        manager.list_bonded_devices().await.unwrap_err(),
        LinkError::PermissionDenied
    );

    assert!(adapter.calls().is_empty());
    assert_eq!(requests.load(Ordering::SeqCst), 5);
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(manager.last_error().unwrap().contains("BluetoothConnect"));
    assert!(manager.messages().is_empty());
}

#[tokio::test]
async fn test_connect_adopts_already_open_link() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let open = MockLink::new(player());
    *adapter.open_link.lock().unwrap() = Some(open.clone());
    let manager = manager(&adapter);

    let device = manager.connect(&player()).await.unwrap();

    assert_eq!(device, player());
    assert!(!adapter.calls().contains(&"connect"));
    let messages = manager.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::System);
    assert!(messages[0].content.starts_with("Already connected"));
    assert_eq!(open.subscriptions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_replacing_session_releases_old_listener() {
    let second = DeviceDescriptor::new("AB:CD:EF:01:23:45", "MP4-Player-2", true);
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player(), second.clone()],
        ..Default::default()
    });
    let manager = manager(&adapter);

    manager.connect(&player()).await.unwrap();
    let first = adapter.last_link();
    manager.connect(&second).await.unwrap();
    settle().await;

    assert_eq!(first.listeners(), 0);
    assert_eq!(first.disconnects.load(Ordering::SeqCst), 0);
    assert_eq!(manager.current_device(), Some(second));
}

#[tokio::test]
async fn test_standalone_pair_appends_one_system_message() {
    let adapter = Arc::new(MockAdapter {
        discovered: vec![discovered_player()],
        ..Default::default()
    });
    let manager = manager(&adapter);

    let paired = manager.pair(&discovered_player()).await.unwrap();

    assert!(paired.bonded);
    assert_eq!(kinds(&manager), vec![MessageKind::System]);
    assert_eq!(manager.status(), ConnectionState::Disconnected);
    assert!(manager.devices().iter().any(|d| d.id == paired.id && d.bonded));
}

#[tokio::test]
async fn test_reconnect_uses_resolved_target() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.find_and_connect("MP4").await.unwrap();
    let first = adapter.last_link();

    let device = manager.reconnect().await.unwrap();

    assert_eq!(device, player());
    assert_eq!(first.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(
        adapter.calls(),
        vec!["list_bonded", "connected", "connect", "connected", "connect"]
    );
    assert_eq!(kinds(&manager), vec![MessageKind::System]);
}

#[tokio::test]
async fn test_reconnect_without_target_touches_nothing() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();
    let link = adapter.last_link();
    let calls_before = adapter.calls().len();

    assert!(matches!(
        manager.reconnect().await.unwrap_err(),
        LinkError::TargetNotFound { .. }
    ));

    assert_eq!(adapter.calls().len(), calls_before);
    assert_eq!(link.disconnects.load(Ordering::SeqCst), 0);
    assert!(manager.is_connected());
    assert_eq!(manager.messages().len(), 1);
}

#[tokio::test]
async fn test_primitives_refresh_directory() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        discovered: vec![discovered_player(), player()],
        ..Default::default()
    });
    let manager = manager(&adapter);

    assert_eq!(manager.list_bonded_devices().await.unwrap(), vec![player()]);
    assert_eq!(manager.discover_devices().await.unwrap().len(), 2);

    let devices = manager.devices();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().find(|d| d.id == player().id).unwrap().bonded);
    assert_eq!(manager.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_discover_requires_enabled_adapter() {
    let adapter = Arc::new(MockAdapter {
        disabled: true,
        ..Default::default()
    });
    let manager = manager(&adapter);

    assert!(!manager.is_adapter_enabled().await);
    assert_eq!(
        manager.discover_devices().await.unwrap_err(),
        LinkError::AdapterDisabled
    );
    assert!(!adapter.calls().contains(&"discover"));
    assert!(manager.request_adapter_enabled().await);
}

#[tokio::test]
async fn test_clear_log_keeps_session() {
    let adapter = Arc::new(MockAdapter {
        bonded: vec![player()],
        ..Default::default()
    });
    let manager = manager(&adapter);
    manager.connect(&player()).await.unwrap();

    manager.clear_log();

    assert!(manager.messages().is_empty());
    assert!(manager.is_connected());
    assert!(manager.send(b"PLAY").await);
    assert_eq!(kinds(&manager), vec![MessageKind::Sent]);
}
