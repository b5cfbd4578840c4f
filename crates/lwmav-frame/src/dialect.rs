//! CRC extra lookup for the framer.
//!
//! Message definitions come from `mavlink::common`. Ids outside that set can
//! be registered with [`Dialect::insert`]; frames for ids known to neither
//! are dropped on receive because their checksum cannot be verified.

use std::collections::HashMap;

use mavlink::common::MavMessage;
use mavlink::Message as _;

/// Framing metadata for one message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageInfo {
    pub msgid: u32,
    pub name: &'static str,
    pub crc_extra: u8,
}

impl MessageInfo {
    pub const fn new(msgid: u32, name: &'static str, crc_extra: u8) -> Self {
        Self {
            msgid,
            name,
            crc_extra,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dialect {
    vendor: HashMap<u32, MessageInfo>,
}

impl Dialect {
    /// The `mavlink` common message set with no vendor additions.
    pub fn common() -> Self {
        Self::default()
    }

    /// Register a vendor message, returning the previous registration.
    ///
    /// Ids already defined by the common set keep their common definition.
    pub fn insert(&mut self, info: MessageInfo) -> Option<MessageInfo> {
        self.vendor.insert(info.msgid, info)
    }

    pub fn get(&self, msgid: u32) -> Option<MessageInfo> {
        match MavMessage::default_message_from_id(msgid) {
            Ok(msg) => Some(MessageInfo::new(
                msgid,
                msg.message_name(),
                MavMessage::extra_crc(msgid),
            )),
            Err(_) => self.vendor.get(&msgid).copied(),
        }
    }

    pub fn contains(&self, msgid: u32) -> bool {
        self.get(msgid).is_some()
    }

    pub fn crc_extra(&self, msgid: u32) -> Option<u8> {
        self.get(msgid).map(|info| info.crc_extra)
    }

    pub fn name(&self, msgid: u32) -> Option<&'static str> {
        self.get(msgid).map(|info| info.name)
    }

    /// Resolve a message name (case-insensitive) to its id.
    pub fn id_by_name(&self, name: &str) -> Option<u32> {
        let upper = name.trim().to_ascii_uppercase();
        MavMessage::message_id_from_name(&upper).ok().or_else(|| {
            self.vendor
                .values()
                .find(|info| info.name == upper)
                .map(|info| info.msgid)
        })
    }
}
