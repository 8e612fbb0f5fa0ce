//! Application layer for the sidebar.
//!
//! # Sub-modules
//!
//! - **`frame_sync`** – The orchestrator.  Owns the port finder and one RPC
//!   channel per connected peer (host, each guest, site, extension), and
//!   turns inbound calls into events for the rest of the sidebar.
//!
//! - **`guest_registry`** – Bookkeeping for guest frames: connection state
//!   and the document each one reported, including retention of persistent
//!   guests across reconnects.

pub mod frame_sync;
pub mod guest_registry;
