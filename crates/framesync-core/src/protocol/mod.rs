//! Protocol module containing the discovery envelope and the RPC payload codec.

pub mod codec;
pub mod messages;

pub use codec::{decode_call, encode_call, ProtocolError, RpcMessage};
pub use messages::*;
