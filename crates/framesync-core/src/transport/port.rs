//! Ordered, reliable duplex message ports.
//!
//! [`message_channel`] returns two entangled [`MessagePort`]s.  Whatever is
//! posted on one end is received, in order, on the other.  Ports can carry
//! other ports, which is how the host hands a guest↔sidebar channel to the
//! sidebar.
//!
//! Each direction is a Tokio unbounded mpsc channel with exactly one sender,
//! so closing (or dropping) one end makes the other end's `recv` return
//! `None` once the already-queued messages have been drained.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for posting on a port.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortError {
    /// This end was closed, or the entangled end has been dropped.
    #[error("port {0} is closed")]
    Closed(u64),
}

/// One message travelling over a port.
pub struct PortMessage {
    /// The structured payload.
    pub data: Value,
    /// Ports transferred alongside the payload.
    pub ports: Vec<MessagePort>,
}

impl PortMessage {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            ports: Vec::new(),
        }
    }

    pub fn with_ports(mut self, ports: Vec<MessagePort>) -> Self {
        self.ports = ports;
        self
    }
}

impl fmt::Debug for PortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortMessage")
            .field("data", &self.data)
            .field("ports", &self.ports.len())
            .finish()
    }
}

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Creates an entangled pair of ports.
///
/// # Examples
///
/// ```rust
/// use framesync_core::transport::{message_channel, PortMessage};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let (port1, mut port2) = message_channel();
/// port1.post_message(PortMessage::new(json!("hi"))).unwrap();
/// assert_eq!(port2.recv().await.unwrap().data, json!("hi"));
/// # });
/// ```
pub fn message_channel() -> (MessagePort, MessagePort) {
    let (to_second, from_first) = mpsc::unbounded_channel();
    let (to_first, from_second) = mpsc::unbounded_channel();
    let first_id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
    let second_id = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);

    let first = MessagePort {
        sender: PortSender {
            id: first_id,
            tx: Some(to_second),
        },
        receiver: PortReceiver {
            id: first_id,
            rx: from_second,
        },
    };
    let second = MessagePort {
        sender: PortSender {
            id: second_id,
            tx: Some(to_first),
        },
        receiver: PortReceiver {
            id: second_id,
            rx: from_first,
        },
    };
    (first, second)
}

/// One end of a [`message_channel`].
pub struct MessagePort {
    sender: PortSender,
    receiver: PortReceiver,
}

impl MessagePort {
    /// Process-unique id of this end, used in log messages.
    pub fn id(&self) -> u64 {
        self.sender.id
    }

    /// Posts `message` to the entangled port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Closed`] if either end has been closed.
    pub fn post_message(&self, message: PortMessage) -> Result<(), PortError> {
        self.sender.post_message(message)
    }

    /// Receives the next message, or `None` once the peer is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<PortMessage> {
        self.receiver.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<PortMessage> {
        self.receiver.try_recv()
    }

    /// Closes both directions of this end.
    pub fn close(&mut self) {
        self.sender.close();
        self.receiver.close();
    }

    /// Splits the port so sending and receiving can live in different owners.
    pub fn into_split(self) -> (PortSender, PortReceiver) {
        (self.sender, self.receiver)
    }
}

impl fmt::Debug for MessagePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessagePort").field("id", &self.id()).finish()
    }
}

/// Sending half of a [`MessagePort`].
pub struct PortSender {
    id: u64,
    tx: Option<mpsc::UnboundedSender<PortMessage>>,
}

impl PortSender {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Posts `message` to the entangled port.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Closed`] after [`PortSender::close`] or once the
    /// receiving end has been dropped.
    pub fn post_message(&self, message: PortMessage) -> Result<(), PortError> {
        let tx = self.tx.as_ref().ok_or(PortError::Closed(self.id))?;
        tx.send(message).map_err(|_| PortError::Closed(self.id))
    }

    /// Stops sending; the peer sees end-of-stream after draining.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

/// Receiving half of a [`MessagePort`].
pub struct PortReceiver {
    id: u64,
    rx: mpsc::UnboundedReceiver<PortMessage>,
}

impl PortReceiver {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PortMessage> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PortMessage> {
        self.rx.try_recv().ok()
    }

    /// Refuses further messages; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
