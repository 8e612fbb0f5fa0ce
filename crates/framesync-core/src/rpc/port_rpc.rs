//! Named calls over one message port.
//!
//! A [`PortRpc`] turns a raw [`MessagePort`] into two operations: register a
//! handler for a method name with [`PortRpc::on`], and invoke a method on the
//! other end with [`PortRpc::call`].  Both ends of a port hold their own
//! `PortRpc`, so a "reply" is simply a call in the opposite direction; there
//! is no request/response correlation at this layer.
//!
//! # Lifecycle
//!
//! ```text
//! Unconnected ──connect()──► Connected ──destroy()──► Destroyed
//!      │                                                  ▲
//!      └──────────────────────destroy()───────────────────┘
//! ```
//!
//! - **Unconnected**: handlers may be registered; calls are queued in order.
//! - **Connected**: a dispatch task reads the port; the queue has been
//!   flushed, followed by any initial calls passed to `connect_with`.
//! - **Destroyed**: a final `close` call has been sent, the port released and
//!   the dispatch task stopped.  Calls are ignored from now on.
//!
//! # Method vocabularies
//!
//! Each direction of a channel has its own [`RpcMethod`] enum.  Inbound names
//! that do not parse into the `OnMethod` vocabulary are dropped, so an older
//! peer never breaks on a newer peer's calls and vice versa.
//!
//! # Handler panics
//!
//! Handlers run synchronously on the dispatch task and are not wrapped in
//! `catch_unwind`.  A panicking handler unwinds that task; Tokio reports the
//! panic and the channel stops dispatching.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::codec::{decode_call, encode_call};
use crate::transport::port::{MessagePort, PortMessage, PortReceiver, PortSender};

/// Method name sent to the peer when a channel is destroyed.
pub const CLOSE_METHOD: &str = "close";

/// A closed vocabulary of method names for one call direction.
///
/// Implementors are plain `Copy` enums; `ALL` lists every variant so that
/// [`RpcMethod::parse`] can map wire names back.
pub trait RpcMethod: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Every method in the vocabulary.
    const ALL: &'static [Self];

    /// Wire name of the method.
    fn as_str(self) -> &'static str;

    /// Maps a wire name back to a method; unknown names yield `None`.
    fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == name)
    }
}

type Handler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;
type HandlerTable<M> = Arc<Mutex<HashMap<M, Handler>>>;

enum ChannelState {
    Unconnected {
        pending: Vec<(&'static str, Vec<Value>)>,
    },
    Connected {
        sender: PortSender,
        dispatcher: JoinHandle<()>,
    },
    Destroyed,
}

/// Named, fire-and-forget calls over one port.
///
/// `OnMethod` is the vocabulary this end handles; `CallMethod` the
/// vocabulary it invokes on the peer.
pub struct PortRpc<OnMethod: RpcMethod, CallMethod: RpcMethod> {
    label: String,
    handlers: HandlerTable<OnMethod>,
    state: Mutex<ChannelState>,
    alive: Arc<AtomicBool>,
    _call: PhantomData<fn(CallMethod)>,
}

impl<OnMethod: RpcMethod, CallMethod: RpcMethod> PortRpc<OnMethod, CallMethod> {
    /// Creates an unconnected channel.  `label` only appears in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            handlers: Arc::new(Mutex::new(HashMap::new())),
            state: Mutex::new(ChannelState::Unconnected {
                pending: Vec::new(),
            }),
            alive: Arc::new(AtomicBool::new(true)),
            _call: PhantomData,
        }
    }

    /// Registers `handler` for `method`, replacing any previous handler.
    pub fn on<F>(&self, method: OnMethod, handler: F)
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        self.handlers.lock().insert(method, Arc::new(handler));
    }

    /// Invokes `method` on the peer.
    ///
    /// Queued while unconnected, ignored after [`PortRpc::destroy`].
    pub fn call(&self, method: CallMethod, args: Vec<Value>) {
        let mut state = self.state.lock();
        match &mut *state {
            ChannelState::Unconnected { pending } => {
                trace!(channel = %self.label, method = method.as_str(), "queued call until connect");
                pending.push((method.as_str(), args));
            }
            ChannelState::Connected { sender, .. } => {
                post_call(sender, &self.label, method.as_str(), args);
            }
            ChannelState::Destroyed => {
                trace!(channel = %self.label, method = method.as_str(), "call after destroy ignored");
            }
        }
    }

    /// Binds the channel to `port`.  See [`PortRpc::connect_with`].
    pub fn connect(&self, port: MessagePort) {
        self.connect_with(port, Vec::new());
    }

    /// Binds the channel to `port`, flushes queued calls in order, then sends
    /// `initial` calls.
    ///
    /// Connecting a channel that is already connected or destroyed is ignored
    /// and `port` is closed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime, since the dispatch loop is
    /// spawned as a task.
    pub fn connect_with(&self, port: MessagePort, initial: Vec<(CallMethod, Vec<Value>)>) {
        let mut state = self.state.lock();
        let pending = match &mut *state {
            ChannelState::Unconnected { pending } => std::mem::take(pending),
            ChannelState::Connected { .. } => {
                warn!(channel = %self.label, port = port.id(), "already connected; closing extra port");
                return;
            }
            ChannelState::Destroyed => {
                warn!(channel = %self.label, port = port.id(), "connect after destroy; closing port");
                return;
            }
        };

        let port_id = port.id();
        let (sender, receiver) = port.into_split();
        let flushed = pending.len();
        for (method, args) in pending {
            post_call(&sender, &self.label, method, args);
        }
        for (method, args) in initial {
            post_call(&sender, &self.label, method.as_str(), args);
        }

        let dispatcher = tokio::spawn(dispatch_loop::<OnMethod>(
            self.label.clone(),
            receiver,
            Arc::clone(&self.handlers),
            Arc::clone(&self.alive),
        ));
        *state = ChannelState::Connected { sender, dispatcher };
        debug!(channel = %self.label, port = port_id, flushed, "channel connected");
    }

    /// Sends `close` to the peer, releases the port and stops dispatching.
    ///
    /// Idempotent.
    pub fn destroy(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), ChannelState::Destroyed);
        match previous {
            ChannelState::Destroyed => return,
            ChannelState::Unconnected { pending } => {
                if !pending.is_empty() {
                    debug!(channel = %self.label, dropped = pending.len(), "destroyed before connect");
                }
            }
            ChannelState::Connected {
                mut sender,
                dispatcher,
            } => {
                post_call(&sender, &self.label, CLOSE_METHOD, Vec::new());
                sender.close();
                dispatcher.abort();
                debug!(channel = %self.label, "channel destroyed");
            }
        }
        self.alive.store(false, Ordering::Release);
        self.handlers.lock().clear();
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ChannelState::Connected { .. })
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(*self.state.lock(), ChannelState::Destroyed)
    }
}

impl<OnMethod: RpcMethod, CallMethod: RpcMethod> Drop for PortRpc<OnMethod, CallMethod> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<OnMethod: RpcMethod, CallMethod: RpcMethod> fmt::Debug for PortRpc<OnMethod, CallMethod> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match *self.state.lock() {
            ChannelState::Unconnected { .. } => "unconnected",
            ChannelState::Connected { .. } => "connected",
            ChannelState::Destroyed => "destroyed",
        };
        f.debug_struct("PortRpc")
            .field("label", &self.label)
            .field("state", &state)
            .finish()
    }
}

fn post_call(sender: &PortSender, label: &str, method: &str, args: Vec<Value>) {
    if let Err(e) = sender.post_message(PortMessage::new(encode_call(method, args))) {
        debug!(channel = %label, method, "call not delivered: {e}");
    }
}

/// Reads the port until it ends, dispatching each call to its handler.
async fn dispatch_loop<M: RpcMethod>(
    label: String,
    mut receiver: PortReceiver,
    handlers: HandlerTable<M>,
    alive: Arc<AtomicBool>,
) {
    while let Some(message) = receiver.recv().await {
        if !alive.load(Ordering::Acquire) {
            break;
        }
        let call = match decode_call(&message.data) {
            Ok(call) => call,
            Err(e) => {
                debug!(channel = %label, "dropping malformed call: {e}");
                continue;
            }
        };
        let Some(method) = M::parse(&call.method) else {
            trace!(channel = %label, method = %call.method, "dropping unknown method");
            continue;
        };
        // Clone the handler out so it can re-enter this channel.
        let handler = handlers.lock().get(&method).cloned();
        match handler {
            Some(handler) => handler(call.args),
            None => trace!(channel = %label, method = %call.method, "no handler registered"),
        }
    }
    debug!(channel = %label, "dispatch loop finished");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
