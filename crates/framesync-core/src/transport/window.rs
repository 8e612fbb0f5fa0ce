//! A frame's shared message target.
//!
//! A [`FrameWindow`] is the bus every discovery message travels on.  Posting a
//! [`MessageEvent`] delivers a clone of it to every [`WindowListener`]
//! attached at that moment; listeners attached later never see it.
//!
//! Transferred ports are owned by exactly one receiver.  All clones of one
//! event share its transfer list, and [`MessageEvent::take_port`] hands each
//! port out once: the first listener that claims it wins.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use super::port::MessagePort;

// ── Message event ─────────────────────────────────────────────────────────────

/// A message delivered to a window listener.
#[derive(Clone)]
pub struct MessageEvent {
    /// The structured payload; arbitrary JSON from arbitrary senders.
    pub data: Value,
    /// The window that posted the event, if it identified itself.
    pub source: Option<FrameWindow>,
    ports: Arc<Mutex<Vec<MessagePort>>>,
}

impl MessageEvent {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            source: None,
            ports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_source(mut self, source: FrameWindow) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_ports(self, ports: Vec<MessagePort>) -> Self {
        *self.ports.lock() = ports;
        self
    }

    /// Claims the first transferred port, if it has not been claimed yet.
    pub fn take_port(&self) -> Option<MessagePort> {
        let mut ports = self.ports.lock();
        if ports.is_empty() {
            None
        } else {
            Some(ports.remove(0))
        }
    }

    /// Number of transferred ports still unclaimed.
    pub fn port_count(&self) -> usize {
        self.ports.lock().len()
    }

    /// Returns `true` if the event was posted by `window`.
    pub fn is_from(&self, window: &FrameWindow) -> bool {
        self.source.as_ref().map_or(false, |s| s.same_window(window))
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("data", &self.data)
            .field("source", &self.source.as_ref().map(FrameWindow::name))
            .field("ports", &self.port_count())
            .finish()
    }
}

// ── Window ────────────────────────────────────────────────────────────────────

struct WindowInner {
    name: String,
    next_listener_id: AtomicU64,
    listeners: Mutex<Vec<(u64, mpsc::UnboundedSender<MessageEvent>)>>,
}

/// Cloneable handle to one frame's message target.
#[derive(Clone)]
pub struct FrameWindow {
    inner: Arc<WindowInner>,
}

impl FrameWindow {
    /// Creates a window; `name` only appears in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WindowInner {
                name: name.into(),
                next_listener_id: AtomicU64::new(0),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Delivers `event` to every attached listener and returns how many were reached.
    ///
    /// With no listener attached the event, and any port it carries, is dropped.
    pub fn post_message(&self, event: MessageEvent) -> usize {
        let mut listeners = self.inner.listeners.lock();
        listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        trace!(window = %self.inner.name, listeners = listeners.len(), "posted message");
        listeners.len()
    }

    /// Attaches a new listener.  Dropping it detaches it.
    pub fn subscribe(&self) -> WindowListener {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.lock().push((id, tx));
        WindowListener {
            id,
            rx,
            window: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Identity comparison: `true` if both handles refer to the same window.
    pub fn same_window(&self, other: &FrameWindow) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FrameWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameWindow")
            .field("name", &self.inner.name)
            .finish()
    }
}

/// A listener attached to a [`FrameWindow`].
pub struct WindowListener {
    id: u64,
    rx: mpsc::UnboundedReceiver<MessageEvent>,
    window: Weak<WindowInner>,
}

impl WindowListener {
    /// Waits for the next event.  Returns `None` once the window is gone.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for WindowListener {
    fn drop(&mut self) {
        if let Some(window) = self.window.upgrade() {
            window.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::port::message_channel;
    use serde_json::json;

    #[tokio::test]
    async fn test_every_listener_sees_every_message() {
        // Arrange
        let window = FrameWindow::new("host");
        let mut a = window.subscribe();
        let mut b = window.subscribe();

        // Act
        let reached = window.post_message(MessageEvent::new(json!("hello")));

        // Assert
        assert_eq!(reached, 2);
        assert_eq!(a.recv().await.unwrap().data, json!("hello"));
        assert_eq!(b.recv().await.unwrap().data, json!("hello"));
    }

    #[test]
    fn test_dropping_listener_detaches_it() {
        let window = FrameWindow::new("sidebar");
        let listener = window.subscribe();
        assert_eq!(window.listener_count(), 1);

        drop(listener);

        assert_eq!(window.listener_count(), 0);
        assert_eq!(window.post_message(MessageEvent::new(json!(1))), 0);
    }

    #[test]
    fn test_late_listener_misses_earlier_messages() {
        let window = FrameWindow::new("guest");
        window.post_message(MessageEvent::new(json!("early")));
        let mut late = window.subscribe();
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_transferred_port_is_claimed_once() {
        // Arrange: two listeners see the same offer
        let window = FrameWindow::new("guest");
        let mut a = window.subscribe();
        let mut b = window.subscribe();
        let (port1, _port2) = message_channel();
        window.post_message(MessageEvent::new(json!({})).with_ports(vec![port1]));

        // Act
        let first = a.try_recv().unwrap().take_port();
        let second = b.try_recv().unwrap().take_port();

        // Assert
        assert!(first.is_some());
        assert!(second.is_none(), "a port has exactly one owner");
    }

    #[test]
    fn test_source_identity() {
        let host = FrameWindow::new("host");
        let other = FrameWindow::new("host");
        let event = MessageEvent::new(json!(null)).with_source(host.clone());

        assert!(event.is_from(&host));
        assert!(!event.is_from(&other), "same name is not the same window");
        assert!(!MessageEvent::new(json!(null)).is_from(&host));
    }
}
