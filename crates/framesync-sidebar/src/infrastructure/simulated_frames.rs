//! In-process stand-ins for the host page and guest content frames.
//!
//! The demo binary and the integration tests run every frame in one process.
//! Each simulated frame owns its own [`FrameWindow`] and does exactly what
//! the real frame would do at the messaging layer:
//!
//! - [`SimulatedHost`] runs a `PortProvider` on the host window and keeps a
//!   host-side channel to the sidebar.
//! - [`SimulatedGuest`] discovers the sidebar, reports its document, and
//!   sends `close` when it goes away.
//!
//! Calls each frame receives are logged and also handed out through an
//! unbounded receiver so callers can assert on them.

use std::sync::Arc;

use framesync_core::{
    FrameRole, FrameWindow, PortFinder, PortProvider, PortRpc, ProviderEvent, RpcMethod,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::guest_registry::DocumentInfo;
use crate::domain::events::{GuestToSidebar, HostToSidebar, SidebarToGuest, SidebarToHost};

/// A call a simulated frame received: method plus arguments.
pub type ReceivedCall<M> = (M, Vec<Value>);

/// Registers a handler for every method of `OnMethod` that logs the call and
/// passes it on through `tx`.
fn record_all<OnMethod, CallMethod>(
    rpc: &PortRpc<OnMethod, CallMethod>,
    frame: &str,
    tx: &mpsc::UnboundedSender<ReceivedCall<OnMethod>>,
) where
    OnMethod: RpcMethod,
    CallMethod: RpcMethod,
{
    for &method in OnMethod::ALL {
        let tx = tx.clone();
        let frame = frame.to_owned();
        rpc.on(method, move |args| {
            info!(%frame, method = method.as_str(), args = args.len(), "call received");
            let _ = tx.send((method, args));
        });
    }
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// A host page: answers discovery and talks to the sidebar.
pub struct SimulatedHost {
    provider: Arc<PortProvider>,
    commands: mpsc::UnboundedSender<ReceivedCall<HostToSidebar>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SimulatedHost {
    /// Starts the provider on `window` and forwards sidebar ports to
    /// `sidebar_window`.
    ///
    /// Returns the host and the calls the sidebar makes on it.
    pub fn start(
        window: FrameWindow,
        sidebar_window: FrameWindow,
    ) -> (Self, mpsc::UnboundedReceiver<ReceivedCall<SidebarToHost>>) {
        let (provider, mut events) = PortProvider::new(window, sidebar_window);
        let provider = Arc::new(provider);
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel::<ReceivedCall<HostToSidebar>>();

        let listening = Arc::clone(&provider);
        let listener = tokio::spawn(async move { listening.listen().await });

        let channel = tokio::spawn(async move {
            let new_channel = || {
                let rpc: PortRpc<SidebarToHost, HostToSidebar> = PortRpc::new("host→sidebar");
                record_all(&rpc, "host", &calls_tx);
                rpc
            };
            // Calls made before the sidebar shows up are queued on the channel.
            let mut sidebar = new_channel();
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(ProviderEvent::FrameConnected { frame: FrameRole::Sidebar, port, .. }) => {
                            if sidebar.is_connected() {
                                sidebar = new_channel();
                            }
                            sidebar.connect(port);
                            info!("host connected to sidebar");
                        }
                        Some(ProviderEvent::FrameConnected { frame, .. }) => {
                            debug!(%frame, "host has no channel for this frame; dropping port");
                        }
                        None => break,
                    },
                    command = command_rx.recv() => match command {
                        Some((method, args)) => sidebar.call(method, args),
                        None => break,
                    },
                }
            }
        });

        (
            Self {
                provider,
                commands,
                tasks: vec![listener, channel],
            },
            calls_rx,
        )
    }

    /// Invokes `method` on the sidebar, queued until the sidebar connects.
    pub fn call_sidebar(&self, method: HostToSidebar, args: Vec<Value>) {
        if self.commands.send((method, args)).is_err() {
            warn!(method = method.as_str(), "host channel task has stopped");
        }
    }

    /// Stops answering discovery and closes the sidebar channel.
    pub fn shutdown(&mut self) {
        self.provider.destroy();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SimulatedHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Guest ─────────────────────────────────────────────────────────────────────

/// A guest content frame connected to the sidebar.
pub struct SimulatedGuest {
    source_id: String,
    commands: mpsc::UnboundedSender<ReceivedCall<GuestToSidebar>>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SimulatedGuest {
    /// Starts a guest that discovers the sidebar through `host_frame`.
    ///
    /// Once connected it reports `document` with `documentInfoChanged`.
    /// Returns the guest and the calls the sidebar makes on it.
    pub fn start(
        host_frame: FrameWindow,
        source_id: impl Into<String>,
        document: DocumentInfo,
    ) -> (Self, mpsc::UnboundedReceiver<ReceivedCall<SidebarToGuest>>) {
        let source_id = source_id.into();
        let window = FrameWindow::new(format!("guest:{source_id}"));
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let (commands, mut command_rx) = mpsc::unbounded_channel::<ReceivedCall<GuestToSidebar>>();
        let (stop, mut stop_rx) = oneshot::channel();

        let id = source_id.clone();
        let task = tokio::spawn(async move {
            let finder =
                PortFinder::new(host_frame, window, FrameRole::Guest).with_source_id(id.clone());
            let port = tokio::select! {
                found = finder.discover(FrameRole::Sidebar) => match found {
                    Ok(port) => port,
                    Err(e) => {
                        warn!(source_id = %id, "guest discovery failed: {e}");
                        return;
                    }
                },
                _ = &mut stop_rx => return,
            };

            let rpc: PortRpc<SidebarToGuest, GuestToSidebar> =
                PortRpc::new(format!("guest:{id}→sidebar"));
            record_all(&rpc, &format!("guest:{id}"), &calls_tx);
            let info = serde_json::to_value(&document).unwrap_or(Value::Null);
            rpc.connect_with(port, vec![(GuestToSidebar::DocumentInfoChanged, vec![info])]);
            info!(source_id = %id, uri = %document.uri, "guest connected to sidebar");

            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some((method, args)) => rpc.call(method, args),
                        None => break,
                    },
                    _ = &mut stop_rx => break,
                }
            }
            // Dropping the channel sends `close` to the sidebar.
            info!(source_id = %id, "guest unloading");
        });

        (
            Self {
                source_id,
                commands,
                stop: Some(stop),
                task: Some(task),
            },
            calls_rx,
        )
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Invokes `method` on the sidebar once the guest is connected.
    pub fn call_sidebar(&self, method: GuestToSidebar, args: Vec<Value>) {
        if self.commands.send((method, args)).is_err() {
            warn!(source_id = %self.source_id, "guest task has stopped");
        }
    }

    /// Unloads the guest and waits until its `close` has been sent.
    pub async fn unload(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(source_id = %self.source_id, "guest task failed: {e}");
            }
        }
    }
}

impl Drop for SimulatedGuest {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
