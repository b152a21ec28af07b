//! Control-plane wire protocol
//!
//! - [`codec`] frames a [`Message`](crate::types::Message) as tag + length + body
//! - [`json_lite`] tokenizes the small JSON subset envelopes use
//! - [`rpc`] builds and parses `{"rpc": ..., "args": [...]}` envelopes

pub mod codec;
pub mod json_lite;
pub mod rpc;

pub use codec::{decode, encode, read_message, write_message};
pub use rpc::{RpcEnvelope, RpcFunction};
