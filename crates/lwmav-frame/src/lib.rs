//! MAVLink framing for the lwmav link engine.
//!
//! This crate turns a byte stream into checksum-validated messages and back:
//! - [`FrameParser`]: byte-at-a-time v1/v2 parser with drop counting
//! - [`finalize`] / [`encode_message`]: fill sequence and checksum, then
//!   serialize as a v2 frame with trailing-zero payload truncation
//! - [`Dialect`]: CRC extra lookup; the `mavlink` common set plus any
//!   vendor messages registered at runtime
//!
//! Payload layouts come from the `mavlink` crate: a [`Message`] carries an
//! opaque payload that decodes into any [`common`] `*_DATA` struct.

pub mod codec;
pub mod dialect;
pub mod error;
pub mod message;

pub use codec::{
    encode_message, finalize, frame_checksum, wire_payload_len, DropReason, FrameParser,
    ParseStatus, ParserStats, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, STX_V1, STX_V2,
};
pub use dialect::{Dialect, MessageInfo};
pub use error::{FrameError, Result};
pub use message::{Message, MessageHeader, Version};

pub use mavlink;
pub use mavlink::common;
pub use mavlink::common::MavMessage;
pub use mavlink::{MavHeader, MavlinkVersion, MessageData};
