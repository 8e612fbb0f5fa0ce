//! # framesync-core
//!
//! Shared library for the cross-frame messaging layer of the annotation
//! client: the discovery envelope, in-memory message ports, and the RPC
//! channels built on top of them.
//!
//! This crate is used by every frame role (host, guest, sidebar, site).
//! It has no knowledge of annotations, stores, or UI; method names are
//! supplied by the caller as [`rpc::RpcMethod`] vocabularies.
//!
//! # Architecture overview
//!
//! Frames cannot share memory.  The only way two frames talk is by posting
//! messages, either to a frame's global message target (a *window*) or over
//! a dedicated two-ended *port*.  Establishing a port between two frames
//! takes a small handshake:
//!
//! ```text
//! guest                       host                         sidebar
//! ─────                       ────                         ───────
//! PortFinder::discover(sidebar)
//!   ── request ──────────────► PortProvider
//!                              creates (port1, port2)
//!   ◄──── offer + port1 ──────
//!                              ──── offer + port2 ───────► FrameSync
//! PortRpc::connect(port1)                                  PortRpc::connect(port2)
//! ```
//!
//! - **`protocol`** – The discovery message envelope with its predicates, and
//!   the `{method, args}` payload carried over an established port.
//! - **`transport`** – In-process models of windows, message events and
//!   message ports, built on Tokio channels.
//! - **`rpc`** – `PortFinder` (requester side of discovery), `PortProvider`
//!   (host side of discovery) and `PortRpc` (named calls over one port).

pub mod protocol;
pub mod rpc;
pub mod transport;

pub use protocol::codec::{decode_call, encode_call, ProtocolError, RpcMessage};
pub use protocol::messages::{
    is_allowed_pair, is_message, is_message_equal, DiscoveryMessage, FrameRole, MessageKind,
    MessagePattern,
};
pub use rpc::port_finder::{
    DiscoveryError, PortFinder, DEFAULT_RETRY_INTERVAL, MIN_RETRY_INTERVAL,
};
pub use rpc::port_provider::{PortProvider, ProviderEvent};
pub use rpc::port_rpc::{PortRpc, RpcMethod, CLOSE_METHOD};
pub use transport::port::{message_channel, MessagePort, PortError, PortMessage};
pub use transport::window::{FrameWindow, MessageEvent, WindowListener};
