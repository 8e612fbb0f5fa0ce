//! Discovery and RPC built on the transport models.
//!
//! # Sub-modules
//!
//! - **`port_finder`** – Requester side of discovery.  Re-broadcasts a
//!   `request` to the host frame until a matching `offer` with a port arrives.
//!
//! - **`port_provider`** – Host side of discovery.  Answers each request with
//!   a fresh port pair and routes the second end to the requested peer.
//!
//! - **`port_rpc`** – Wraps one port into named, fire-and-forget calls with
//!   a per-method handler table.

pub mod port_finder;
pub mod port_provider;
pub mod port_rpc;

pub use port_finder::{
    DiscoveryError, PortFinder, DEFAULT_RETRY_INTERVAL, MIN_RETRY_INTERVAL,
};
pub use port_provider::{PortProvider, ProviderEvent};
pub use port_rpc::{PortRpc, RpcMethod, CLOSE_METHOD};
