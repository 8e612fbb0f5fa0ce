//! GuestRegistry: what the sidebar knows about each guest frame.
//!
//! Entries are keyed by the guest's `sourceId`.  Each one records whether a
//! channel is currently open and the last document info the guest reported.
//!
//! # Guest lifecycle (for beginners)
//!
//! ```text
//! connect()  ──►  Connected  ──documentInfoChanged──►  Connected (+ document)
//!                     │
//!                 disconnect()
//!                     │
//!        persistent? ─┼─ yes ──►  Disconnected (kept, restored on reconnect)
//!                     └─ no  ──►  removed
//! ```
//!
//! A guest is *persistent* when its document says so, e.g. a PDF viewer that
//! reloads its frame when the user navigates between pages of one document.
//! Keeping its entry lets the sidebar treat the reconnect as the same guest.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Document metadata a guest reports with `documentInfoChanged`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub uri: String,
    /// Identifier of the frame inside the host page, if it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_identifier: Option<String>,
    /// Retain the guest's state across a disconnect.
    #[serde(default)]
    pub persistent: bool,
}

/// Whether a known guest currently has an open channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    Connected,
    Disconnected,
}

/// Registry entry for one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestEntry {
    pub source_id: String,
    pub state: GuestState,
    pub document: Option<DocumentInfo>,
}

impl GuestEntry {
    pub fn is_persistent(&self) -> bool {
        self.document.as_ref().map_or(false, |d| d.persistent)
    }
}

/// In-memory registry of guest frames.
#[derive(Debug, Default)]
pub struct GuestRegistry {
    guests: HashMap<String, GuestEntry>,
}

impl GuestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `source_id` connected.
    ///
    /// Returns `true` if a retained entry was restored, `false` for a guest
    /// seen for the first time (or one already connected).
    pub fn connect(&mut self, source_id: &str) -> bool {
        match self.guests.get_mut(source_id) {
            Some(entry) => {
                let restored = entry.state == GuestState::Disconnected;
                entry.state = GuestState::Connected;
                restored
            }
            None => {
                self.guests.insert(
                    source_id.to_owned(),
                    GuestEntry {
                        source_id: source_id.to_owned(),
                        state: GuestState::Connected,
                        document: None,
                    },
                );
                false
            }
        }
    }

    /// Records the document a guest reported.  Unknown guests are ignored.
    pub fn update_document(&mut self, source_id: &str, document: DocumentInfo) {
        if let Some(entry) = self.guests.get_mut(source_id) {
            entry.document = Some(document);
        }
    }

    /// Handles a guest's channel closing.
    ///
    /// Persistent guests are kept as [`GuestState::Disconnected`] and `true`
    /// is returned; all others are removed.
    pub fn disconnect(&mut self, source_id: &str) -> bool {
        let Some(entry) = self.guests.get_mut(source_id) else {
            return false;
        };
        if entry.is_persistent() {
            entry.state = GuestState::Disconnected;
            true
        } else {
            self.guests.remove(source_id);
            false
        }
    }

    pub fn get(&self, source_id: &str) -> Option<&GuestEntry> {
        self.guests.get(source_id)
    }

    /// Returns a snapshot of every known guest.
    pub fn all(&self) -> Vec<GuestEntry> {
        self.guests.values().cloned().collect()
    }

    /// Ids of guests with an open channel.
    pub fn connected(&self) -> Vec<String> {
        self.guests
            .values()
            .filter(|g| g.state == GuestState::Connected)
            .map(|g| g.source_id.clone())
            .collect()
    }

    pub fn clear(&mut self) {
        self.guests.clear();
    }
}
