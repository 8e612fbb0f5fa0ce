//! Discovery messages exchanged on a frame's shared message target.
//!
//! Every frame that cares about discovery listens on the same kind of bus: the
//! window-level message stream.  That bus also carries unrelated traffic
//! (other libraries, browser extensions, other frames), so everything read
//! from it is untyped JSON until [`is_message`] says otherwise.
//!
//! # Wire format
//!
//! ```json
//! {"frame1":"guest","frame2":"sidebar","type":"request","requestId":"4f1c…","sourceId":"main"}
//! ```
//!
//! - `frame1` is the role that asked for the channel, `frame2` the role it
//!   wants to reach.
//! - `type` is `"request"` when a frame is looking for a peer and `"offer"`
//!   when a port is attached to the message.
//! - `sourceId` distinguishes several instances of one role; absent means the
//!   default instance.
//! - `requestId` is generated once per discovery call and echoed in the offer.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Frame roles ───────────────────────────────────────────────────────────────

/// Symbolic role of a frame taking part in discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameRole {
    /// A content frame hosting an annotatable document.
    Guest,
    /// The top-level page that embeds the sidebar and answers discovery requests.
    Host,
    /// The sidebar application frame.
    Sidebar,
    /// A site-specific frame, e.g. one embedding a video player.
    Site,
}

impl FrameRole {
    /// Returns the wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            FrameRole::Guest => "guest",
            FrameRole::Host => "host",
            FrameRole::Sidebar => "sidebar",
            FrameRole::Site => "site",
        }
    }

    /// Parses a wire name; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "guest" => Some(FrameRole::Guest),
            "host" => Some(FrameRole::Host),
            "sidebar" => Some(FrameRole::Sidebar),
            "site" => Some(FrameRole::Site),
            _ => None,
        }
    }
}

impl fmt::Display for FrameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns `true` for the `(requester, target)` pairs the host answers.
///
/// | frame1  | frame2  |
/// |---------|---------|
/// | guest   | host    |
/// | guest   | sidebar |
/// | sidebar | host    |
/// | site    | sidebar |
pub fn is_allowed_pair(frame1: FrameRole, frame2: FrameRole) -> bool {
    matches!(
        (frame1, frame2),
        (FrameRole::Guest, FrameRole::Host)
            | (FrameRole::Guest, FrameRole::Sidebar)
            | (FrameRole::Sidebar, FrameRole::Host)
            | (FrameRole::Site, FrameRole::Sidebar)
    )
}

// ── Message kind ──────────────────────────────────────────────────────────────

/// The `type` field of a discovery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// "I am looking for a peer."
    Request,
    /// "Here is a port for you."
    Offer,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Offer => "offer",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "request" => Some(MessageKind::Request),
            "offer" => Some(MessageKind::Offer),
            _ => None,
        }
    }
}

// ── Typed message ─────────────────────────────────────────────────────────────

/// A well-formed discovery message with known roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryMessage {
    pub frame1: FrameRole,
    pub frame2: FrameRole,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DiscoveryMessage {
    /// Builds a `request` from `frame1` for a channel to `frame2`.
    pub fn request(
        frame1: FrameRole,
        frame2: FrameRole,
        request_id: impl Into<String>,
        source_id: Option<String>,
    ) -> Self {
        Self {
            frame1,
            frame2,
            kind: MessageKind::Request,
            source_id,
            request_id: Some(request_id.into()),
        }
    }

    /// Builds the `offer` answering this message, keeping roles and ids.
    pub fn to_offer(&self) -> Self {
        Self {
            kind: MessageKind::Offer,
            ..self.clone()
        }
    }

    /// Serializes the message into the JSON value posted on the bus.
    pub fn to_value(&self) -> Value {
        // Serializing a struct of strings and unit enums cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parses a bus value leniently.
    ///
    /// Returns `None` for anything [`is_message`] rejects and for roles this
    /// crate does not know; never panics.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !is_message(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

// ── Predicates ────────────────────────────────────────────────────────────────

/// Structural check for a discovery message.
///
/// `value` must be an object with string `frame1` and `frame2` fields and a
/// `type` of `"request"` or `"offer"`.  Any other input, including `null`,
/// primitives and arrays, returns `false`.
pub fn is_message(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    let is_string = |key: &str| obj.get(key).map_or(false, Value::is_string);

    is_string("frame1")
        && is_string("frame2")
        && obj
            .get("type")
            .and_then(Value::as_str)
            .and_then(MessageKind::parse)
            .is_some()
}

/// A partial discovery message; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePattern {
    pub frame1: Option<FrameRole>,
    pub frame2: Option<FrameRole>,
    pub kind: Option<MessageKind>,
    pub source_id: Option<String>,
    pub request_id: Option<String>,
}

/// `is_message(value)` and every field set in `pattern` equals the field in `value`.
pub fn is_message_equal(value: &Value, pattern: &MessagePattern) -> bool {
    if !is_message(value) {
        return false;
    }
    let field = |key: &str| value.get(key).and_then(Value::as_str);
    let matches = |expected: Option<&str>, key: &str| expected.map_or(true, |e| field(key) == Some(e));

    matches(pattern.frame1.map(FrameRole::as_str), "frame1")
        && matches(pattern.frame2.map(FrameRole::as_str), "frame2")
        && matches(pattern.kind.map(MessageKind::as_str), "type")
        && matches(pattern.source_id.as_deref(), "sourceId")
        && matches(pattern.request_id.as_deref(), "requestId")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_message_rejects_non_objects() {
        for value in [json!(null), json!(42), json!("frame1"), json!(true), json!([1, 2])] {
            assert!(!is_message(&value), "{value} must not be a message");
        }
    }

    #[test]
    fn test_is_message_rejects_missing_fields() {
        assert!(!is_message(&json!({"frame1": "a"})));
        assert!(!is_message(&json!({"frame1": "a", "frame2": "b"})));
        assert!(!is_message(&json!({"frame2": "b", "type": "offer"})));
    }

    #[test]
    fn test_is_message_rejects_wrong_field_types() {
        assert!(!is_message(&json!({"frame1": 1, "frame2": "b", "type": "offer"})));
        assert!(!is_message(&json!({"frame1": "a", "frame2": null, "type": "offer"})));
        assert!(!is_message(&json!({"frame1": "a", "frame2": "b", "type": "answer"})));
        assert!(!is_message(&json!({"frame1": "a", "frame2": "b", "type": 1})));
    }

    #[test]
    fn test_is_message_accepts_arbitrary_role_strings() {
        // Roles are only checked structurally here.
        assert!(is_message(&json!({"frame1": "a", "frame2": "b", "type": "request"})));
    }

    #[test]
    fn test_is_message_equal_matches_subset_pattern() {
        // Arrange
        let value = json!({"frame1": "guest", "frame2": "sidebar", "type": "offer", "sourceId": "g1"});
        let pattern = MessagePattern {
            frame1: Some(FrameRole::Guest),
            frame2: Some(FrameRole::Sidebar),
            kind: Some(MessageKind::Offer),
            ..Default::default()
        };

        // Act / Assert
        assert!(is_message_equal(&value, &pattern));
    }

    #[test]
    fn test_is_message_equal_rejects_differing_field() {
        let value = json!({"frame1": "guest", "frame2": "sidebar", "type": "offer", "sourceId": "g1"});
        let pattern = MessagePattern {
            frame1: Some(FrameRole::Host),
            frame2: Some(FrameRole::Sidebar),
            kind: Some(MessageKind::Offer),
            ..Default::default()
        };

        assert!(!is_message_equal(&value, &pattern));
    }

    #[test]
    fn test_is_message_equal_checks_ids_when_set() {
        let value = json!({"frame1": "guest", "frame2": "host", "type": "offer", "requestId": "r1"});
        let same = MessagePattern { request_id: Some("r1".into()), ..Default::default() };
        let other = MessagePattern { request_id: Some("r2".into()), ..Default::default() };
        let with_source = MessagePattern { source_id: Some("g1".into()), ..Default::default() };

        assert!(is_message_equal(&value, &same));
        assert!(!is_message_equal(&value, &other));
        assert!(!is_message_equal(&value, &with_source), "absent sourceId must not match a set one");
    }

    #[test]
    fn test_is_message_equal_rejects_malformed_value_even_with_empty_pattern() {
        assert!(!is_message_equal(&json!({"frame1": "guest"}), &MessagePattern::default()));
    }

    #[test]
    fn test_request_serializes_with_camel_case_ids() {
        // Arrange
        let msg = DiscoveryMessage::request(FrameRole::Guest, FrameRole::Sidebar, "r1", Some("g1".into()));

        // Act
        let value = msg.to_value();

        // Assert
        assert_eq!(
            value,
            json!({"frame1": "guest", "frame2": "sidebar", "type": "request", "sourceId": "g1", "requestId": "r1"})
        );
        assert!(is_message(&value));
    }

    #[test]
    fn test_request_without_source_id_omits_field() {
        let value = DiscoveryMessage::request(FrameRole::Sidebar, FrameRole::Host, "r9", None).to_value();
        assert!(value.get("sourceId").is_none());
    }

    #[test]
    fn test_to_offer_keeps_roles_and_ids() {
        let request = DiscoveryMessage::request(FrameRole::Site, FrameRole::Sidebar, "r2", Some("video".into()));
        let offer = request.to_offer();

        assert_eq!(offer.kind, MessageKind::Offer);
        assert_eq!(offer.frame1, FrameRole::Site);
        assert_eq!(offer.request_id.as_deref(), Some("r2"));
        assert_eq!(offer.source_id.as_deref(), Some("video"));
    }

    #[test]
    fn test_from_value_rejects_unknown_roles() {
        let value = json!({"frame1": "notebook", "frame2": "sidebar", "type": "request"});
        assert!(is_message(&value));
        assert_eq!(DiscoveryMessage::from_value(&value), None);
    }

    #[test]
    fn test_from_value_accepts_null_source_id() {
        let value = json!({"frame1": "guest", "frame2": "host", "type": "request", "sourceId": null});
        let msg = DiscoveryMessage::from_value(&value).expect("null sourceId is the default instance");
        assert_eq!(msg.source_id, None);
    }

    #[test]
    fn test_allowed_pairs() {
        assert!(is_allowed_pair(FrameRole::Guest, FrameRole::Host));
        assert!(is_allowed_pair(FrameRole::Guest, FrameRole::Sidebar));
        assert!(is_allowed_pair(FrameRole::Sidebar, FrameRole::Host));
        assert!(is_allowed_pair(FrameRole::Site, FrameRole::Sidebar));
        assert!(!is_allowed_pair(FrameRole::Host, FrameRole::Guest));
        assert!(!is_allowed_pair(FrameRole::Sidebar, FrameRole::Guest));
        assert!(!is_allowed_pair(FrameRole::Site, FrameRole::Host));
    }

    #[test]
    fn test_frame_role_parse_round_trips_wire_names() {
        for role in [FrameRole::Guest, FrameRole::Host, FrameRole::Sidebar, FrameRole::Site] {
            assert_eq!(FrameRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(FrameRole::parse("notebook"), None);
    }
}
