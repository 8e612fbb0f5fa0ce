//! In-process models of the browser messaging primitives.
//!
//! # Sub-modules
//!
//! - **`port`** – A two-ended, ordered, reliable message port pair.  This is
//!   the dedicated channel that a successful discovery hands out, and what a
//!   `PortRpc` wraps.
//!
//! - **`window`** – A frame's shared message target.  Discovery requests and
//!   offers travel here; every listener attached to a window sees every
//!   message posted to it, including traffic it does not care about.

pub mod port;
pub mod window;

pub use port::{message_channel, MessagePort, PortError, PortMessage, PortReceiver, PortSender};
pub use window::{FrameWindow, MessageEvent, WindowListener};
