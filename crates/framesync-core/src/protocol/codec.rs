//! Payload codec for calls carried over an established port.
//!
//! Wire format, one object per logical call:
//! ```json
//! {"method":"loadAnnotations","args":[[{"$tag":"t1"}]]}
//! ```
//!
//! Decoding is lenient about `args`: a missing field reads as an empty list.
//! Everything else that does not fit the shape is a [`ProtocolError`], which
//! the channel logs and drops.

use serde_json::Value;
use thiserror::Error;

/// Errors produced while decoding an inbound call payload.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,

    /// The `method` field is missing or not a string.
    #[error("payload has no string `method` field")]
    MissingMethod,

    /// The `args` field is present but not an array.
    #[error("`args` of method {0:?} is not an array")]
    InvalidArgs(String),
}

/// One decoded `{method, args}` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcMessage {
    pub method: String,
    pub args: Vec<Value>,
}

/// Builds the payload for a call to `method` with `args`.
///
/// # Examples
///
/// ```rust
/// use framesync_core::protocol::{decode_call, encode_call};
/// use serde_json::json;
///
/// let payload = encode_call("ping", vec![json!(42)]);
/// let call = decode_call(&payload).unwrap();
/// assert_eq!(call.method, "ping");
/// assert_eq!(call.args, vec![json!(42)]);
/// ```
pub fn encode_call(method: &str, args: Vec<Value>) -> Value {
    let mut obj = serde_json::Map::with_capacity(2);
    obj.insert("method".to_owned(), Value::String(method.to_owned()));
    obj.insert("args".to_owned(), Value::Array(args));
    Value::Object(obj)
}

/// Decodes an inbound payload into an [`RpcMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the payload does not have the call shape.
pub fn decode_call(payload: &Value) -> Result<RpcMessage, ProtocolError> {
    let obj = payload.as_object().ok_or(ProtocolError::NotAnObject)?;
    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingMethod)?;

    let args = match obj.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(ProtocolError::InvalidArgs(method.to_owned())),
    };

    Ok(RpcMessage {
        method: method.to_owned(),
        args,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
