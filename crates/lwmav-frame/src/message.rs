use bytes::Bytes;
use mavlink::common::MavMessage;
use mavlink::{MavlinkVersion, MessageData};

use crate::codec::{wire_payload_len, MAX_PAYLOAD_LEN};
use crate::error::{FrameError, Result};

/// Wire protocol revision of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    V1,
    #[default]
    V2,
}

/// Frame header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MessageHeader {
    pub version: Version,
    pub incompat_flags: u8,
    pub compat_flags: u8,
    pub seq: u8,
    pub sysid: u8,
    pub compid: u8,
    pub msgid: u32,
}

/// One MAVLink message: header, payload and checksum.
///
/// The payload is opaque until decoded. Messages built from typed data
/// carry the payload as it goes on the wire, trailing zeros trimmed, so a
/// sent message compares equal to the one the peer parses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Bytes,
    pub checksum: u16,
}

impl Message {
    /// A v2 message with zero source ids, to be filled in on send.
    pub fn new(msgid: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            header: MessageHeader {
                msgid,
                ..MessageHeader::default()
            },
            payload: payload.into(),
            checksum: 0,
        }
    }

    /// Serialize a typed `*_DATA` payload.
    pub fn from_data<D: MessageData>(data: &D) -> Self {
        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let len = data.ser(MavlinkVersion::V2, &mut buf);
        let len = wire_payload_len(&buf[..len]);
        Self::new(D::ID, Bytes::copy_from_slice(&buf[..len]))
    }

    /// Serialize any common-set message.
    pub fn from_mav(msg: &MavMessage) -> Self {
        use mavlink::Message as _;

        let mut buf = [0u8; MAX_PAYLOAD_LEN];
        let len = msg.ser(MavlinkVersion::V2, &mut buf);
        let len = wire_payload_len(&buf[..len]);
        Self::new(msg.message_id(), Bytes::copy_from_slice(&buf[..len]))
    }

    pub fn msgid(&self) -> u32 {
        self.header.msgid
    }

    pub fn sysid(&self) -> u8 {
        self.header.sysid
    }

    pub fn compid(&self) -> u8 {
        self.header.compid
    }

    pub fn seq(&self) -> u8 {
        self.header.seq
    }

    /// Set the source system/component ids.
    pub fn with_source(mut self, sysid: u8, compid: u8) -> Self {
        self.header.sysid = sysid;
        self.header.compid = compid;
        self
    }

    /// Decode the payload as `D`, checking the message id first. Short
    /// (truncated) payloads read as zero-extended.
    pub fn decode<D: MessageData>(&self) -> Result<D> {
        if self.header.msgid != D::ID {
            return Err(FrameError::MessageMismatch {
                expected: D::ID,
                got: self.header.msgid,
            });
        }
        D::deser(self.version(), &self.payload).map_err(|err| FrameError::Decode {
            msgid: D::ID,
            reason: err.to_string(),
        })
    }

    /// Decode into the common-set message enum.
    pub fn to_mav(&self) -> Result<MavMessage> {
        use mavlink::Message as _;

        MavMessage::parse(self.version(), self.header.msgid, &self.payload).map_err(|err| {
            FrameError::Decode {
                msgid: self.header.msgid,
                reason: err.to_string(),
            }
        })
    }

    pub fn is<D: MessageData>(&self) -> bool {
        self.header.msgid == D::ID
    }

    fn version(&self) -> MavlinkVersion {
        match self.header.version {
            Version::V1 => MavlinkVersion::V1,
            Version::V2 => MavlinkVersion::V2,
        }
    }
}
