//! Requester side of port discovery.
//!
//! A frame that needs a channel to another role cannot know when that role's
//! code has loaded: frames load in parallel and there is no cross-frame
//! "ready" signal.  The finder therefore keeps re-posting its `request` to
//! the host frame until the host answers with an `offer` carrying a port.
//!
//! ```text
//! discover(target)
//!   ├─ attach listener on own window
//!   ├─ every retry interval: post {frame1: self, frame2: target, type: request, requestId}
//!   └─ on {frame1: self, frame2: target, type: offer, requestId} from host:
//!        take the port, stop retrying, detach listener, return
//! ```
//!
//! There is no hard timeout.  Callers that want one wrap the future in
//! `tokio::time::timeout`.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::protocol::messages::{
    is_allowed_pair, is_message_equal, DiscoveryMessage, FrameRole, MessageKind, MessagePattern,
};
use crate::transport::port::MessagePort;
use crate::transport::window::{FrameWindow, MessageEvent};

/// Interval between re-broadcasts of an unanswered request.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);

/// Shortest accepted retry interval; shorter values are raised to this.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Error type for discovery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The host never answers this `(source, target)` pair.
    #[error("invalid request of channel/port: {requester}-{target}")]
    InvalidRequest { requester: FrameRole, target: FrameRole },
}

/// Discovers ports to other frames through the host frame.
pub struct PortFinder {
    host_frame: FrameWindow,
    window: FrameWindow,
    source: FrameRole,
    source_id: Option<String>,
    retry_interval: Duration,
    destroyed: watch::Sender<bool>,
}

impl PortFinder {
    /// Creates a finder for a frame playing `source`.
    ///
    /// Requests are posted to `host_frame`; offers are expected on `window`,
    /// this frame's own message target.
    pub fn new(host_frame: FrameWindow, window: FrameWindow, source: FrameRole) -> Self {
        let (destroyed, _) = watch::channel(false);
        Self {
            host_frame,
            window,
            source,
            source_id: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            destroyed,
        }
    }

    /// Identifies this instance of the role, e.g. one of several guests.
    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Sets the re-broadcast interval, raised to at least [`MIN_RETRY_INTERVAL`].
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        if retry_interval < MIN_RETRY_INTERVAL {
            warn!(?retry_interval, minimum = ?MIN_RETRY_INTERVAL, "retry interval too short; using the minimum");
        }
        self.retry_interval = retry_interval.max(MIN_RETRY_INTERVAL);
        self
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn source(&self) -> FrameRole {
        self.source
    }

    /// Waits for a port to `target`.
    ///
    /// Safe to call concurrently; every call uses its own request id, listener
    /// and timer, and resolves at most once.  After [`PortFinder::destroy`]
    /// the returned future never completes; its listener and timer are
    /// released first.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidRequest`] immediately if the host does
    /// not serve the `(source, target)` pair.
    pub async fn discover(&self, target: FrameRole) -> Result<MessagePort, DiscoveryError> {
        if !is_allowed_pair(self.source, target) {
            return Err(DiscoveryError::InvalidRequest {
                requester: self.source,
                target,
            });
        }

        let mut destroyed = self.destroyed.subscribe();
        if *destroyed.borrow() {
            return std::future::pending().await;
        }

        let request_id = Uuid::new_v4().simple().to_string();
        let request = DiscoveryMessage::request(
            self.source,
            target,
            request_id.clone(),
            self.source_id.clone(),
        )
        .to_value();
        let pattern = MessagePattern {
            frame1: Some(self.source),
            frame2: Some(target),
            kind: Some(MessageKind::Offer),
            request_id: Some(request_id.clone()),
            ..Default::default()
        };

        let mut listener = self.window.subscribe();
        let mut retry = tokio::time::interval(self.retry_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u64 = 0;

        loop {
            tokio::select! {
                _ = retry.tick() => {
                    attempts += 1;
                    trace!(source = %self.source, %target, %request_id, attempts, "posting port request");
                    self.host_frame.post_message(
                        MessageEvent::new(request.clone()).with_source(self.window.clone()),
                    );
                }
                event = listener.recv() => {
                    let Some(event) = event else { break };
                    if !is_message_equal(&event.data, &pattern) {
                        continue;
                    }
                    if !event.is_from(&self.host_frame) {
                        debug!(source = %self.source, %target, "ignoring offer not sent by the host frame");
                        continue;
                    }
                    match event.take_port() {
                        Some(port) => {
                            info!(source = %self.source, %target, attempts, port = port.id(), "port discovered");
                            return Ok(port);
                        }
                        None => debug!(source = %self.source, %target, "offer without an unclaimed port"),
                    }
                }
                _ = destroyed.changed() => break,
            }
        }

        // Destroyed (or our own window is gone): release everything, never resolve.
        drop(listener);
        drop(retry);
        debug!(source = %self.source, %target, "discovery abandoned");
        std::future::pending().await
    }

    /// Abandons every pending discovery.  Idempotent.
    pub fn destroy(&self) {
        self.destroyed.send_replace(true);
    }

    pub fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }
}

impl Drop for PortFinder {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
