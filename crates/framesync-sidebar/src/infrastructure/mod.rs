//! Infrastructure layer for the sidebar.
//!
//! - **`storage`** – TOML configuration file persistence.
//! - **`simulated_frames`** – In-process host and guest frames used by the
//!   demo binary and the integration tests.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `framesync_core`, but MUST NOT be imported by the `application` or domain
//! layers.

pub mod simulated_frames;
pub mod storage;
