//! Host side of port discovery.
//!
//! The host frame is the only frame every other frame can reach, so it
//! brokers every channel.  For each new `request` it creates a fresh port
//! pair, answers the requester with an `offer` carrying one end, and routes
//! the other end:
//!
//! ```text
//! guest ──request(guest→sidebar)──► host
//!   ◄──offer + port1──────────────  │
//!                                   └──offer + port2──► sidebar
//!
//! guest ──request(guest→host)─────► host
//!   ◄──offer + port1──────────────  │
//!                                   └──FrameConnected(port2)──► host application
//! ```
//!
//! Requesters re-post until answered, so the provider remembers the most
//! recent answered `requestId`s and ignores the repeats.  A request without a
//! `requestId` cannot be told apart from its own re-broadcasts and is answered
//! with a fresh port pair every time it arrives.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::protocol::messages::{is_allowed_pair, DiscoveryMessage, FrameRole, MessageKind};
use crate::transport::port::{message_channel, MessagePort};
use crate::transport::window::{FrameWindow, MessageEvent};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How many answered request ids are remembered before the oldest is evicted.
const ANSWERED_CAPACITY: usize = 256;

/// Answered request ids, oldest first, bounded by [`ANSWERED_CAPACITY`].
#[derive(Debug, Default)]
struct AnsweredRequests {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl AnsweredRequests {
    /// Records `id`.  Returns `false` if it was already recorded.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == ANSWERED_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_owned());
        self.order.push_back(id.to_owned());
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Events the provider hands to the host application.
#[derive(Debug)]
pub enum ProviderEvent {
    /// A frame asked for a channel to the host; `port` is the host's end.
    FrameConnected {
        frame: FrameRole,
        source_id: Option<String>,
        port: MessagePort,
    },
}

/// Answers discovery requests posted to the host window.
pub struct PortProvider {
    window: FrameWindow,
    sidebar_window: FrameWindow,
    answered: Mutex<AnsweredRequests>,
    events: mpsc::Sender<ProviderEvent>,
    destroyed: watch::Sender<bool>,
}

impl PortProvider {
    /// Creates a provider for the host `window`.
    ///
    /// Returns the provider and the receiving end of its event channel.
    pub fn new(
        window: FrameWindow,
        sidebar_window: FrameWindow,
    ) -> (Self, mpsc::Receiver<ProviderEvent>) {
        let (events, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (destroyed, _) = watch::channel(false);
        (
            Self {
                window,
                sidebar_window,
                answered: Mutex::new(AnsweredRequests::default()),
                events,
                destroyed,
            },
            rx,
        )
    }

    /// Handles one event posted to the host window.
    ///
    /// Anything that is not a fresh `request` for a supported pair is ignored.
    pub async fn handle_event(&self, event: &MessageEvent) {
        let Some(request) = DiscoveryMessage::from_value(&event.data) else {
            return;
        };
        if request.kind != MessageKind::Request {
            return;
        }
        if !is_allowed_pair(request.frame1, request.frame2) {
            debug!(frame1 = %request.frame1, frame2 = %request.frame2, "ignoring request for unsupported pair");
            return;
        }
        let Some(reply_to) = event.source.as_ref() else {
            debug!(frame1 = %request.frame1, "ignoring request without a source window");
            return;
        };
        if let Some(id) = &request.request_id {
            if !self.answered.lock().insert(id) {
                trace!(request_id = %id, "request already answered");
                return;
            }
        }

        let (port1, port2) = message_channel();
        let offer = request.to_offer();
        reply_to.post_message(
            MessageEvent::new(offer.to_value())
                .with_source(self.window.clone())
                .with_ports(vec![port1]),
        );

        match request.frame2 {
            FrameRole::Host => {
                info!(frame = %request.frame1, source_id = ?request.source_id, "frame connected to host");
                let event = ProviderEvent::FrameConnected {
                    frame: request.frame1,
                    source_id: request.source_id,
                    port: port2,
                };
                if self.events.send(event).await.is_err() {
                    warn!("host application stopped receiving provider events");
                }
            }
            FrameRole::Sidebar => {
                let reached = self.sidebar_window.post_message(
                    MessageEvent::new(offer.to_value())
                        .with_source(self.window.clone())
                        .with_ports(vec![port2]),
                );
                info!(frame = %request.frame1, source_id = ?request.source_id, reached, "forwarded port to sidebar");
            }
            FrameRole::Guest | FrameRole::Site => {}
        }
    }

    /// Handles host window events until [`PortProvider::destroy`].
    pub async fn listen(&self) {
        let mut destroyed = self.destroyed.subscribe();
        if *destroyed.borrow() {
            return;
        }
        let mut listener = self.window.subscribe();
        debug!(window = %self.window.name(), "port provider listening");
        loop {
            tokio::select! {
                event = listener.recv() => match event {
                    Some(event) => self.handle_event(&event).await,
                    None => break,
                },
                _ = destroyed.changed() => break,
            }
        }
        debug!(window = %self.window.name(), "port provider stopped");
    }

    /// Stops [`PortProvider::listen`].  Idempotent.
    pub fn destroy(&self) {
        self.destroyed.send_replace(true);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
