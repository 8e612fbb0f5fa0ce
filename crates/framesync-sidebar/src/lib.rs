//! framesync-sidebar library entry point.
//!
//! The sidebar is the frame that talks to everyone: the host page, every
//! guest content frame, an optional site frame and the browser extension.
//! This crate holds the orchestrator that owns those channels.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the demo binary in `main.rs` share the same module tree.

pub mod application;
pub mod domain;
pub mod infrastructure;
