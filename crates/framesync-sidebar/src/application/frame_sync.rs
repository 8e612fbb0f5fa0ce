//! FrameSyncService: owns every channel the sidebar has open.
//!
//! # Responsibilities
//!
//! - Discover the host frame and connect the host channel.
//! - Accept guest and site ports the host forwards to the sidebar window, one
//!   channel per identity.
//! - Connect the extension channel when the embedding context hands over a port.
//! - Forward inbound calls to the application as [`FrameSyncEvent`]s.
//! - Tear channels down when a peer sends `close`.
//!
//! # Event loop
//!
//! ```text
//!                 ┌─────────────── sidebar window ◄── offers from host
//! process_next() ─┤
//!                 └─────────────── inbound calls  ◄── PortRpc handlers
//!                                       │
//!                                       ▼
//!                        mpsc::Receiver<FrameSyncEvent>  (application)
//! ```
//!
//! Channel handlers never touch the service directly.  They push onto an
//! internal queue and `process_next` applies them, so every registry
//! mutation happens on the caller's task.
//!
//! # Superseded connections
//!
//! A guest that reloads opens a new channel under the same `sourceId`.  The
//! new channel replaces and destroys the old one.  The same holds for the
//! host, site and extension channels.  Each channel carries a generation
//! number; calls still queued from an older generation, including its
//! `close`, are dropped so they cannot tear down the replacement.

use std::collections::HashMap;
use std::time::Duration;

use framesync_core::{
    DiscoveryError, DiscoveryMessage, FrameRole, FrameWindow, MessageEvent, MessageKind,
    MessagePort, PortFinder, PortRpc, RpcMethod, WindowListener,
};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::application::guest_registry::{DocumentInfo, GuestRegistry};
use crate::domain::annotation::project_for_guests;
use crate::domain::config::FrameSyncConfig;
use crate::domain::events::{
    ExtensionToSidebar, GuestToSidebar, HostToSidebar, SidebarToExtension, SidebarToGuest,
    SidebarToHost, SidebarToSite, SiteToSidebar,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Error type for orchestrator operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameSyncError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("host frame was not found within {0:?}")]
    DiscoveryTimeout(Duration),
    #[error("host channel is already connected")]
    AlreadyConnected,
    #[error("frame sync has been destroyed")]
    Destroyed,
}

/// Events emitted to the sidebar application.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameSyncEvent {
    HostConnected,
    /// The host page sent `close`.
    HostDisconnected,
    HostCall {
        method: HostToSidebar,
        args: Vec<Value>,
    },
    /// `restored` is `true` when a retained persistent guest came back.
    GuestConnected {
        source_id: String,
        restored: bool,
    },
    /// `retained` is `true` when the guest's state is kept for a reconnect.
    GuestDisconnected {
        source_id: String,
        retained: bool,
    },
    GuestCall {
        source_id: String,
        method: GuestToSidebar,
        args: Vec<Value>,
    },
    SiteConnected,
    SiteDisconnected,
    SiteCall {
        method: SiteToSidebar,
        args: Vec<Value>,
    },
    ExtensionConnected,
    ExtensionDisconnected,
    ExtensionCall {
        method: ExtensionToSidebar,
        args: Vec<Value>,
    },
}

/// A call received on one of the sidebar's channels, tagged with its origin.
#[derive(Debug)]
enum Inbound {
    Host {
        generation: u64,
        method: HostToSidebar,
        args: Vec<Value>,
    },
    Guest {
        source_id: String,
        generation: u64,
        method: GuestToSidebar,
        args: Vec<Value>,
    },
    Site {
        generation: u64,
        method: SiteToSidebar,
        args: Vec<Value>,
    },
    Extension {
        generation: u64,
        method: ExtensionToSidebar,
        args: Vec<Value>,
    },
}

/// A channel plus the generation it was opened with.
struct Connection<OnMethod: RpcMethod, CallMethod: RpcMethod> {
    generation: u64,
    rpc: PortRpc<OnMethod, CallMethod>,
}

fn host_channel(
    generation: u64,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> Connection<HostToSidebar, SidebarToHost> {
    let rpc = PortRpc::new("sidebar→host");
    forward_all(&rpc, inbound, move |method, args| Inbound::Host {
        generation,
        method,
        args,
    });
    Connection { generation, rpc }
}

fn extension_channel(
    generation: u64,
    inbound: &mpsc::UnboundedSender<Inbound>,
) -> Connection<ExtensionToSidebar, SidebarToExtension> {
    let rpc = PortRpc::new("sidebar→extension");
    forward_all(&rpc, inbound, move |method, args| Inbound::Extension {
        generation,
        method,
        args,
    });
    Connection { generation, rpc }
}

/// Routes every method of `OnMethod` into the inbound queue.
fn forward_all<OnMethod, CallMethod, F>(
    rpc: &PortRpc<OnMethod, CallMethod>,
    inbound: &mpsc::UnboundedSender<Inbound>,
    wrap: F,
) where
    OnMethod: RpcMethod,
    CallMethod: RpcMethod,
    F: Fn(OnMethod, Vec<Value>) -> Inbound + Clone + Send + Sync + 'static,
{
    for &method in OnMethod::ALL {
        let inbound = inbound.clone();
        let wrap = wrap.clone();
        rpc.on(method, move |args| {
            let _ = inbound.send(wrap(method, args));
        });
    }
}

/// The sidebar's frame sync orchestrator.
pub struct FrameSyncService {
    config: FrameSyncConfig,
    host_frame: FrameWindow,
    finder: PortFinder,
    offers: Option<WindowListener>,
    host: Connection<HostToSidebar, SidebarToHost>,
    extension: Connection<ExtensionToSidebar, SidebarToExtension>,
    site: Option<Connection<SiteToSidebar, SidebarToSite>>,
    guests: HashMap<String, Connection<GuestToSidebar, SidebarToGuest>>,
    registry: GuestRegistry,
    annotations: Vec<Value>,
    recording: bool,
    next_generation: u64,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    events: mpsc::Sender<FrameSyncEvent>,
    destroyed: bool,
}

impl FrameSyncService {
    /// Creates the orchestrator for the sidebar frame.
    ///
    /// `window` is the sidebar's own message target, `host_frame` the frame
    /// discovery requests go to.  The offer listener is attached here, so
    /// guests that finish discovery before [`FrameSyncService::connect`]
    /// are not missed.
    pub fn new(
        config: FrameSyncConfig,
        window: FrameWindow,
        host_frame: FrameWindow,
    ) -> (Self, mpsc::Receiver<FrameSyncEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let finder = PortFinder::new(host_frame.clone(), window.clone(), FrameRole::Sidebar)
            .with_retry_interval(config.discovery.retry_interval());
        let offers = Some(window.subscribe());

        // Both channels exist from the start so calls made before connecting are queued.
        let host = host_channel(1, &inbound_tx);
        let extension = extension_channel(2, &inbound_tx);

        let service = Self {
            config,
            host_frame,
            finder,
            offers,
            host,
            extension,
            site: None,
            guests: HashMap::new(),
            registry: GuestRegistry::new(),
            annotations: Vec::new(),
            recording: false,
            next_generation: 2,
            inbound_tx,
            inbound_rx,
            events,
            destroyed: false,
        };
        (service, rx)
    }

    // ── Connections ───────────────────────────────────────────────────────────

    /// Discovers the host frame and connects the host channel.
    ///
    /// Waits indefinitely unless `discovery.timeout_ms` is configured.
    ///
    /// # Errors
    ///
    /// - [`FrameSyncError::DiscoveryTimeout`] if the timeout elapses first.
    /// - [`FrameSyncError::AlreadyConnected`] if the host channel is open.
    /// - [`FrameSyncError::Destroyed`] after [`FrameSyncService::destroy`].
    pub async fn connect(&mut self) -> Result<(), FrameSyncError> {
        if self.destroyed {
            return Err(FrameSyncError::Destroyed);
        }
        if self.host.rpc.is_connected() {
            return Err(FrameSyncError::AlreadyConnected);
        }

        let discovery = self.finder.discover(FrameRole::Host);
        let port = match self.config.discovery.timeout() {
            Some(limit) => tokio::time::timeout(limit, discovery)
                .await
                .map_err(|_| FrameSyncError::DiscoveryTimeout(limit))??,
            None => discovery.await?,
        };

        self.attach_host(port).await;
        Ok(())
    }

    async fn attach_host(&mut self, port: MessagePort) {
        self.host.rpc.connect(port);
        info!(generation = self.host.generation, "connected to host frame");
        self.emit(FrameSyncEvent::HostConnected).await;
    }

    /// Connects the extension channel over `port`.
    ///
    /// The current recording state is sent as the first call.  A second port
    /// replaces the first channel.
    pub async fn connect_extension(&mut self, port: MessagePort, recording: bool) {
        if self.destroyed {
            return;
        }
        self.recording = recording;
        if self.extension.rpc.is_connected() {
            info!(old = self.extension.generation, "extension channel superseded");
            self.reset_extension();
        }
        self.extension.rpc.connect_with(
            port,
            vec![(
                SidebarToExtension::RecordingStateChanged,
                vec![Value::Bool(recording)],
            )],
        );
        info!(recording, generation = self.extension.generation, "connected to extension");
        self.emit(FrameSyncEvent::ExtensionConnected).await;
    }

    /// Replaces the extension channel with a fresh, unconnected generation.
    fn reset_extension(&mut self) {
        let extension = extension_channel(self.next_generation(), &self.inbound_tx);
        std::mem::replace(&mut self.extension, extension).rpc.destroy();
    }

    fn reset_host(&mut self) {
        let host = host_channel(self.next_generation(), &self.inbound_tx);
        std::mem::replace(&mut self.host, host).rpc.destroy();
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    async fn connect_guest(&mut self, source_id: String, port: MessagePort) {
        let generation = self.next_generation();
        let rpc = PortRpc::new(format!("sidebar→guest:{source_id}"));
        let id = source_id.clone();
        forward_all(&rpc, &self.inbound_tx, move |method, args| Inbound::Guest {
            source_id: id.clone(),
            generation,
            method,
            args,
        });

        let projected = self.guest_annotations();
        rpc.connect_with(port, vec![(SidebarToGuest::LoadAnnotations, vec![projected])]);

        if let Some(old) = self
            .guests
            .insert(source_id.clone(), Connection { generation, rpc })
        {
            info!(%source_id, old = old.generation, new = generation, "guest channel superseded");
            old.rpc.destroy();
        }
        let restored = self.registry.connect(&source_id);
        info!(%source_id, generation, restored, "guest connected");
        self.emit(FrameSyncEvent::GuestConnected {
            source_id,
            restored,
        })
        .await;
    }

    async fn connect_site(&mut self, port: MessagePort) {
        let generation = self.next_generation();
        let rpc = PortRpc::new("sidebar→site");
        forward_all(&rpc, &self.inbound_tx, move |method, args| Inbound::Site {
            generation,
            method,
            args,
        });
        rpc.connect(port);
        if let Some(old) = self.site.replace(Connection { generation, rpc }) {
            info!(old = old.generation, new = generation, "site channel superseded");
            old.rpc.destroy();
        }
        info!(generation, "site connected");
        self.emit(FrameSyncEvent::SiteConnected).await;
    }

    // ── Event loop ────────────────────────────────────────────────────────────

    /// Handles one forwarded offer or one inbound call.
    ///
    /// Returns `false` once there is nothing left to wait for: the service
    /// was destroyed or the sidebar window went away.
    pub async fn process_next(&mut self) -> bool {
        if self.destroyed {
            return false;
        }
        let Some(offers) = self.offers.as_mut() else {
            return false;
        };
        tokio::select! {
            biased;
            Some(call) = self.inbound_rx.recv() => {
                self.handle_inbound(call).await;
                true
            }
            event = offers.recv() => match event {
                Some(event) => {
                    self.handle_offer(event).await;
                    true
                }
                None => {
                    self.offers = None;
                    false
                }
            },
        }
    }

    /// Runs [`FrameSyncService::process_next`] until `shutdown` flips to
    /// `true` or there is nothing left to do, then destroys the service.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            tokio::select! {
                more = self.process_next() => if !more { break },
                changed = shutdown.changed() => if changed.is_err() { break },
            }
        }
        self.destroy();
    }

    async fn handle_offer(&mut self, event: MessageEvent) {
        let Some(offer) = DiscoveryMessage::from_value(&event.data) else {
            return;
        };
        if offer.kind != MessageKind::Offer || offer.frame2 != FrameRole::Sidebar {
            return;
        }
        if !event.is_from(&self.host_frame) {
            debug!(frame = %offer.frame1, "ignoring offer not sent by the host frame");
            return;
        }
        let Some(port) = event.take_port() else {
            debug!(frame = %offer.frame1, "offer without an unclaimed port");
            return;
        };

        match offer.frame1 {
            FrameRole::Guest => {
                let source_id = offer
                    .source_id
                    .unwrap_or_else(|| self.config.guests.default_source_id.clone());
                self.connect_guest(source_id, port).await;
            }
            FrameRole::Site => self.connect_site(port).await,
            other => debug!(frame = %other, "no channel for offers from this role"),
        }
    }

    async fn handle_inbound(&mut self, call: Inbound) {
        match call {
            Inbound::Host {
                generation,
                method,
                args,
            } => {
                if generation != self.host.generation {
                    trace!(generation, method = method.as_str(), "dropping call from superseded host channel");
                } else if method == HostToSidebar::Close {
                    info!("host frame closed its channel");
                    self.reset_host();
                    self.emit(FrameSyncEvent::HostDisconnected).await;
                } else {
                    self.emit(FrameSyncEvent::HostCall { method, args }).await;
                }
            }
            Inbound::Extension {
                generation,
                method,
                args,
            } => {
                if generation != self.extension.generation {
                    trace!(generation, method = method.as_str(), "dropping call from superseded extension channel");
                } else if method == ExtensionToSidebar::Close {
                    info!("extension closed its channel");
                    self.reset_extension();
                    self.emit(FrameSyncEvent::ExtensionDisconnected).await;
                } else {
                    self.emit(FrameSyncEvent::ExtensionCall { method, args }).await;
                }
            }
            Inbound::Guest {
                source_id,
                generation,
                method,
                args,
            } => self.handle_guest_call(source_id, generation, method, args).await,
            Inbound::Site {
                generation,
                method,
                args,
            } => {
                if self.site.as_ref().map(|s| s.generation) != Some(generation) {
                    trace!(generation, method = method.as_str(), "dropping call from superseded site channel");
                    return;
                }
                if method == SiteToSidebar::Close {
                    if let Some(site) = self.site.take() {
                        site.rpc.destroy();
                    }
                    info!("site frame closed its channel");
                    self.emit(FrameSyncEvent::SiteDisconnected).await;
                } else {
                    self.emit(FrameSyncEvent::SiteCall { method, args }).await;
                }
            }
        }
    }

    async fn handle_guest_call(
        &mut self,
        source_id: String,
        generation: u64,
        method: GuestToSidebar,
        args: Vec<Value>,
    ) {
        let current = self.guests.get(&source_id).map(|c| c.generation);
        if current != Some(generation) {
            debug!(%source_id, generation, ?current, method = method.as_str(), "dropping call from superseded guest channel");
            return;
        }

        match method {
            GuestToSidebar::Close => {
                if let Some(connection) = self.guests.remove(&source_id) {
                    connection.rpc.destroy();
                }
                let retained = self.registry.disconnect(&source_id);
                info!(%source_id, retained, "guest disconnected");
                self.emit(FrameSyncEvent::GuestDisconnected {
                    source_id,
                    retained,
                })
                .await;
            }
            GuestToSidebar::DocumentInfoChanged => {
                match args.first().cloned().map(serde_json::from_value::<DocumentInfo>) {
                    Some(Ok(info)) => {
                        debug!(%source_id, uri = %info.uri, persistent = info.persistent, "guest document changed");
                        self.registry.update_document(&source_id, info);
                    }
                    _ => warn!(%source_id, "documentInfoChanged without a valid document"),
                }
                self.emit(FrameSyncEvent::GuestCall {
                    source_id,
                    method,
                    args,
                })
                .await;
            }
            _ => {
                self.emit(FrameSyncEvent::GuestCall {
                    source_id,
                    method,
                    args,
                })
                .await;
            }
        }
    }

    async fn emit(&self, event: FrameSyncEvent) {
        if self.events.send(event).await.is_err() {
            trace!("frame sync event receiver dropped");
        }
    }

    // ── Outbound calls ────────────────────────────────────────────────────────

    pub fn call_host(&self, method: SidebarToHost, args: Vec<Value>) {
        self.host.rpc.call(method, args);
    }

    /// Calls one guest.  Returns `false` if no channel is open for `source_id`.
    pub fn call_guest(&self, source_id: &str, method: SidebarToGuest, args: Vec<Value>) -> bool {
        match self.guests.get(source_id) {
            Some(connection) => {
                connection.rpc.call(method, args);
                true
            }
            None => false,
        }
    }

    /// Calls every connected guest.
    pub fn call_guests(&self, method: SidebarToGuest, args: Vec<Value>) {
        for connection in self.guests.values() {
            connection.rpc.call(method, args.clone());
        }
    }

    /// Calls the site frame.  Returns `false` if none is connected.
    pub fn call_site(&self, method: SidebarToSite, args: Vec<Value>) -> bool {
        match &self.site {
            Some(site) => {
                site.rpc.call(method, args);
                true
            }
            None => false,
        }
    }

    /// Calls the extension.  Queued until [`FrameSyncService::connect_extension`].
    pub fn call_extension(&self, method: SidebarToExtension, args: Vec<Value>) {
        self.extension.rpc.call(method, args);
    }

    /// Updates the recording state and tells the extension.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
        self.call_extension(
            SidebarToExtension::RecordingStateChanged,
            vec![Value::Bool(recording)],
        );
    }

    /// Replaces the annotation set and sends every guest its projection.
    ///
    /// Guests connecting later receive the current projection as their
    /// first call.
    pub fn load_annotations(&mut self, annotations: &[Value]) {
        self.annotations = annotations.to_vec();
        let projected = self.guest_annotations();
        self.call_guests(SidebarToGuest::LoadAnnotations, vec![projected]);
    }

    fn guest_annotations(&self) -> Value {
        Value::Array(
            project_for_guests(&self.annotations)
                .iter()
                .map(|a| a.to_value())
                .collect(),
        )
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn is_host_connected(&self) -> bool {
        self.host.rpc.is_connected()
    }

    pub fn is_extension_connected(&self) -> bool {
        self.extension.rpc.is_connected()
    }

    pub fn is_site_connected(&self) -> bool {
        self.site.is_some()
    }

    pub fn recording(&self) -> bool {
        self.recording
    }

    /// Ids of guests with an open channel, sorted.
    pub fn connected_guests(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.guests.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn registry(&self) -> &GuestRegistry {
        &self.registry
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Stops discovery and destroys every channel.  Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.finder.destroy();
        self.offers = None;
        self.host.rpc.destroy();
        self.extension.rpc.destroy();
        if let Some(site) = self.site.take() {
            site.rpc.destroy();
        }
        for (_, connection) in self.guests.drain() {
            connection.rpc.destroy();
        }
        self.registry.clear();
        info!("frame sync destroyed");
    }
}

impl Drop for FrameSyncService {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
