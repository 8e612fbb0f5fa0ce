//! The slice of an annotation a guest frame is allowed to see.
//!
//! Guest frames can run third-party script.  They need to know where to draw
//! highlights, not what anyone wrote, so the sidebar only ever sends them the
//! local tag, the selectors and the document URI.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Annotation data sent to guests with `loadAnnotations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuestAnnotation {
    /// Sidebar-local tag; stable for the annotation's lifetime in this session.
    #[serde(rename = "$tag")]
    pub tag: String,
    /// Selectors used to anchor the highlight.
    pub target: Value,
    pub uri: String,
}

impl GuestAnnotation {
    /// Projects a full annotation object.
    ///
    /// Returns `None` if it has no string `$tag`; such annotations have not
    /// been registered with the sidebar yet and guests could not refer back
    /// to them.
    pub fn from_annotation(annotation: &Value) -> Option<Self> {
        let tag = annotation.get("$tag")?.as_str()?.to_owned();
        let target = annotation
            .get("target")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        let uri = annotation
            .get("uri")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        Some(Self { tag, target, uri })
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "$tag": self.tag, "target": self.target, "uri": self.uri })
    }
}

/// Projects every annotation with a tag, keeping order.
pub fn project_for_guests(annotations: &[Value]) -> Vec<GuestAnnotation> {
    annotations
        .iter()
        .filter_map(GuestAnnotation::from_annotation)
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_projection_drops_body_and_user_fields() {
        // Arrange
        let annotation = json!({
            "$tag": "t1",
            "id": "server-id",
            "user": "acct:alice@example.com",
            "text": "private note",
            "tags": ["secret"],
            "uri": "https://example.com/doc",
            "target": [{"selector": [{"type": "TextQuoteSelector", "exact": "hello"}]}],
        });

        // Act
        let projected = GuestAnnotation::from_annotation(&annotation).unwrap().to_value();

        // Assert
        let keys: Vec<_> = projected.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(projected["$tag"], json!("t1"));
        assert_eq!(projected["uri"], json!("https://example.com/doc"));
        assert_eq!(projected["target"], annotation["target"]);
        assert!(projected.get("text").is_none());
    }

    #[test]
    fn test_untagged_annotations_are_skipped() {
        let projected = project_for_guests(&[
            json!({"text": "no tag"}),
            json!({"$tag": "t2"}),
            json!(null),
        ]);

        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].tag, "t2");
        assert_eq!(projected[0].target, json!([]));
        assert_eq!(projected[0].uri, "");
    }

    #[test]
    fn test_serde_uses_dollar_tag() {
        let a = GuestAnnotation {
            tag: "t3".into(),
            target: json!([]),
            uri: "u".into(),
        };
        assert_eq!(serde_json::to_value(&a).unwrap(), a.to_value());
    }
}
