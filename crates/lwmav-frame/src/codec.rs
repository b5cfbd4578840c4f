use bytes::{BufMut, BytesMut};
use crc_any::CRCu16;
use serde::Serialize;
use tracing::trace;

use crate::dialect::{Dialect, MessageInfo};
use crate::error::{FrameError, Result};
use crate::message::{Message, MessageHeader, Version};

/// MAVLink v1 start-of-frame marker.
pub const STX_V1: u8 = 0xFE;
/// MAVLink v2 start-of-frame marker.
pub const STX_V2: u8 = 0xFD;

/// v1 header after STX: len, seq, sysid, compid, msgid.
pub const HEADER_LEN_V1: usize = 5;
/// v2 header after STX: len, incompat, compat, seq, sysid, compid, msgid (3B).
pub const HEADER_LEN_V2: usize = 9;
pub const CHECKSUM_LEN: usize = 2;
pub const SIGNATURE_LEN: usize = 13;
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Incompatibility flag: frame carries a trailing signature.
pub const INCOMPAT_SIGNED: u8 = 0x01;

/// Largest possible frame on the wire.
pub const MAX_FRAME_LEN: usize = 1 + HEADER_LEN_V2 + MAX_PAYLOAD_LEN + CHECKSUM_LEN + SIGNATURE_LEN;

/// CRC-16/MCRF4XX over `data` followed by the message's CRC extra byte.
pub fn frame_checksum(data: &[u8], crc_extra: u8) -> u16 {
    let mut crc = CRCu16::crc16mcrf4cc();
    crc.digest(data);
    crc.digest(&[crc_extra]);
    crc.get_crc()
}

/// Why the parser discarded a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Checksum did not match (corruption or a CRC-extra mismatch).
    BadChecksum { msgid: u32, expected: u16, got: u16 },
    /// The dialect has no CRC extra for this id, so the frame cannot be verified.
    UnknownMessage { msgid: u32 },
    /// v2 incompatibility flags this parser does not understand.
    UnsupportedFlags { flags: u8 },
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadChecksum {
                msgid,
                expected,
                got,
            } => write!(
                f,
                "bad checksum for msgid {msgid} (expected {expected:#06x}, got {got:#06x})"
            ),
            Self::UnknownMessage { msgid } => write!(f, "unknown msgid {msgid}"),
            Self::UnsupportedFlags { flags } => write!(f, "unsupported incompat flags {flags:#04x}"),
        }
    }
}

/// Outcome of feeding one byte to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseStatus {
    /// More bytes are needed.
    Incomplete,
    /// A checksum-valid frame completed on this byte.
    Complete(Message),
    /// A frame was discarded on this byte.
    Dropped(DropReason),
}

/// Running parser counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParserStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    /// Bytes seen outside any frame while hunting for a start marker.
    pub bytes_skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Header,
    Body,
}

/// Incremental, byte-at-a-time MAVLink frame parser.
///
/// Accepts v1 and v2 frames. Signed v2 frames are accepted with their
/// signature skipped, not verified.
#[derive(Debug, Clone)]
pub struct FrameParser {
    dialect: Dialect,
    state: State,
    version: Version,
    raw: BytesMut,
    needed: usize,
    info: Option<MessageInfo>,
    stats: ParserStats,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::with_dialect(Dialect::common())
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: State::Idle,
            version: Version::V2,
            raw: BytesMut::with_capacity(MAX_FRAME_LEN),
            needed: 0,
            info: None,
            stats: ParserStats::default(),
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn dialect_mut(&mut self) -> &mut Dialect {
        &mut self.dialect
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Discard any partial frame and zero the counters.
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.raw.clear();
        self.needed = 0;
        self.info = None;
        self.stats = ParserStats::default();
    }

    /// True while a frame has been started but not completed.
    pub fn in_frame(&self) -> bool {
        self.state != State::Idle
    }

    pub fn parse_byte(&mut self, byte: u8) -> ParseStatus {
        match self.state {
            State::Idle => {
                match byte {
                    STX_V2 => self.start(Version::V2, HEADER_LEN_V2),
                    STX_V1 => self.start(Version::V1, HEADER_LEN_V1),
                    _ => self.stats.bytes_skipped += 1,
                }
                ParseStatus::Incomplete
            }
            State::Header => {
                self.raw.put_u8(byte);
                if self.raw.len() < self.needed {
                    return ParseStatus::Incomplete;
                }
                self.header_complete()
            }
            State::Body => {
                self.raw.put_u8(byte);
                if self.raw.len() < self.needed {
                    return ParseStatus::Incomplete;
                }
                self.frame_complete()
            }
        }
    }

    fn start(&mut self, version: Version, header_len: usize) {
        self.version = version;
        self.raw.clear();
        self.needed = header_len;
        self.state = State::Header;
    }

    fn header_complete(&mut self) -> ParseStatus {
        let len = self.raw[0] as usize;
        let (header_len, msgid, signed) = match self.version {
            Version::V1 => (HEADER_LEN_V1, u32::from(self.raw[4]), false),
            Version::V2 => {
                let incompat = self.raw[1];
                if incompat & !INCOMPAT_SIGNED != 0 {
                    return self.drop_frame(DropReason::UnsupportedFlags { flags: incompat });
                }
                let msgid = u32::from_le_bytes([self.raw[6], self.raw[7], self.raw[8], 0]);
                (HEADER_LEN_V2, msgid, incompat & INCOMPAT_SIGNED != 0)
            }
        };

        self.info = self.dialect.get(msgid);
        self.needed = header_len + len + CHECKSUM_LEN + if signed { SIGNATURE_LEN } else { 0 };
        self.state = State::Body;
        ParseStatus::Incomplete
    }

    fn frame_complete(&mut self) -> ParseStatus {
        let raw = &self.raw;
        let len = raw[0] as usize;
        let header = match self.version {
            Version::V1 => MessageHeader {
                version: Version::V1,
                incompat_flags: 0,
                compat_flags: 0,
                seq: raw[1],
                sysid: raw[2],
                compid: raw[3],
                msgid: u32::from(raw[4]),
            },
            Version::V2 => MessageHeader {
                version: Version::V2,
                incompat_flags: raw[1],
                compat_flags: raw[2],
                seq: raw[3],
                sysid: raw[4],
                compid: raw[5],
                msgid: u32::from_le_bytes([raw[6], raw[7], raw[8], 0]),
            },
        };
        let header_len = match self.version {
            Version::V1 => HEADER_LEN_V1,
            Version::V2 => HEADER_LEN_V2,
        };

        let Some(info) = self.info else {
            return self.drop_frame(DropReason::UnknownMessage {
                msgid: header.msgid,
            });
        };

        let body_end = header_len + len;
        let got = u16::from_le_bytes([raw[body_end], raw[body_end + 1]]);
        let expected = frame_checksum(&raw[..body_end], info.crc_extra);
        if got != expected {
            return self.drop_frame(DropReason::BadChecksum {
                msgid: header.msgid,
                expected,
                got,
            });
        }

        let payload = BytesMut::from(&raw[header_len..body_end]);

        trace!(msgid = header.msgid, seq = header.seq, len, "frame parsed");
        self.stats.frames_received += 1;
        self.state = State::Idle;
        ParseStatus::Complete(Message {
            header,
            payload: payload.freeze(),
            checksum: got,
        })
    }

    fn drop_frame(&mut self, reason: DropReason) -> ParseStatus {
        self.stats.frames_dropped += 1;
        self.state = State::Idle;
        self.raw.clear();
        ParseStatus::Dropped(reason)
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload length actually put on the wire: trailing zeros trimmed, never
/// below one byte.
pub fn wire_payload_len(payload: &[u8]) -> usize {
    payload
        .iter()
        .rposition(|&b| b != 0)
        .map_or(1, |last| last + 1)
        .min(payload.len())
}

fn header_v2(msg: &Message, wire_len: usize) -> [u8; HEADER_LEN_V2] {
    let id = msg.header.msgid.to_le_bytes();
    [
        wire_len as u8,
        msg.header.incompat_flags,
        msg.header.compat_flags,
        msg.header.seq,
        msg.header.sysid,
        msg.header.compid,
        id[0],
        id[1],
        id[2],
    ]
}

/// Fill the sequence number and checksum of an outbound v2 message.
///
/// The payload is trimmed to its wire length first, so that what is sent
/// equals what the peer parses.
pub fn finalize(msg: &mut Message, seq: u8, crc_extra: u8) -> Result<()> {
    if msg.payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            msgid: msg.header.msgid,
            size: msg.payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }
    let wire_len = wire_payload_len(&msg.payload);
    msg.payload.truncate(wire_len);

    msg.header.version = Version::V2;
    msg.header.incompat_flags = 0;
    msg.header.compat_flags = 0;
    msg.header.seq = seq;

    let mut crc_input = BytesMut::with_capacity(HEADER_LEN_V2 + wire_len);
    crc_input.put_slice(&header_v2(msg, wire_len));
    crc_input.put_slice(&msg.payload);
    msg.checksum = frame_checksum(&crc_input, crc_extra);
    Ok(())
}

/// Serialize a finalized message as a v2 frame. Returns the bytes written.
pub fn encode_message(msg: &Message, dst: &mut BytesMut) -> usize {
    let wire_len = wire_payload_len(&msg.payload);
    let total = 1 + HEADER_LEN_V2 + wire_len + CHECKSUM_LEN;
    dst.reserve(total);
    dst.put_u8(STX_V2);
    dst.put_slice(&header_v2(msg, wire_len));
    dst.put_slice(&msg.payload[..wire_len]);
    dst.put_u16_le(msg.checksum);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use mavlink::common::{
        MavCmd, MavMessage, COMMAND_LONG_DATA, HEARTBEAT_DATA, SERVO_OUTPUT_RAW_DATA,
    };
    use mavlink::{MavHeader, MessageData};

    fn header(seq: u8) -> MavHeader {
        MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: seq,
        }
    }

    fn wire_v2(msg: &MavMessage, seq: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        mavlink::write_v2_msg(&mut buf, header(seq), msg).unwrap();
        buf
    }

    fn feed(parser: &mut FrameParser, bytes: &[u8]) -> Vec<ParseStatus> {
        bytes
            .iter()
            .map(|&b| parser.parse_byte(b))
            .filter(|status| *status != ParseStatus::Incomplete)
            .collect()
    }

    fn command_long() -> COMMAND_LONG_DATA {
        COMMAND_LONG_DATA {
            target_system: 1,
            target_component: 1,
            command: MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            param1: 1.0,
            ..Default::default()
        }
    }

    fn servo_output() -> SERVO_OUTPUT_RAW_DATA {
        SERVO_OUTPUT_RAW_DATA {
            time_usec: 123_456,
            port: 0,
            servo1_raw: 1500,
            servo2_raw: 1100,
            servo3_raw: 1900,
            ..Default::default()
        }
    }

    #[test]
    fn parses_frames_from_mavlink_writer() {
        let mut parser = FrameParser::new();
        let frames = [
            MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()),
            MavMessage::COMMAND_LONG(command_long()),
            MavMessage::SERVO_OUTPUT_RAW(servo_output()),
        ];

        for (seq, mav) in frames.iter().enumerate() {
            let out = feed(&mut parser, &wire_v2(mav, seq as u8));
            let [ParseStatus::Complete(msg)] = out.as_slice() else {
                panic!("expected one frame, got {out:?}");
            };
            assert_eq!(msg.seq(), seq as u8);
            assert_eq!(&msg.to_mav().unwrap(), mav);
        }
        assert_eq!(parser.stats().frames_received, 3);
        assert_eq!(parser.stats().frames_dropped, 0);
    }

    #[test]
    fn servo_output_raw_is_not_dropped() {
        let mut parser = FrameParser::new();
        let bytes = wire_v2(&MavMessage::SERVO_OUTPUT_RAW(servo_output()), 9);

        let out = feed(&mut parser, &bytes);
        let [ParseStatus::Complete(msg)] = out.as_slice() else {
            panic!("expected one frame, got {out:?}");
        };
        assert_eq!(msg.msgid(), SERVO_OUTPUT_RAW_DATA::ID);
        assert_eq!(msg.decode::<SERVO_OUTPUT_RAW_DATA>().unwrap(), servo_output());
        assert_eq!(parser.stats().frames_dropped, 0);
    }

    #[test]
    fn encoded_frame_matches_mavlink_writer() {
        let mut msg = Message::from_data(&command_long()).with_source(1, 1);
        finalize(&mut msg, 42, COMMAND_LONG_DATA::EXTRA_CRC).unwrap();
        let mut ours = BytesMut::new();
        let written = encode_message(&msg, &mut ours);

        let theirs = wire_v2(&MavMessage::COMMAND_LONG(command_long()), 42);
        assert_eq!(written, theirs.len());
        assert_eq!(&ours[..], &theirs[..]);
    }

    #[test]
    fn finalize_trims_payload_to_wire_length() {
        let mut msg = Message::new(HEARTBEAT_DATA::ID, vec![0u8; 9]);
        finalize(&mut msg, 0, HEARTBEAT_DATA::EXTRA_CRC).unwrap();
        assert_eq!(msg.payload.len(), 1);
        assert_eq!(msg.header.version, Version::V2);
    }

    #[test]
    fn finalize_rejects_oversized_payload() {
        let mut msg = Message::new(10_000, vec![1u8; MAX_PAYLOAD_LEN + 1]);
        let err = finalize(&mut msg, 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { msgid: 10_000, .. }));
    }

    #[test]
    fn parses_v1_frames() {
        let mut buf = Vec::new();
        let mav = MavMessage::COMMAND_LONG(command_long());
        mavlink::write_v1_msg(&mut buf, header(3), &mav).unwrap();
        assert_eq!(buf[0], STX_V1);

        let mut parser = FrameParser::new();
        let out = feed(&mut parser, &buf);
        let [ParseStatus::Complete(msg)] = out.as_slice() else {
            panic!("expected one frame, got {out:?}");
        };
        assert_eq!(msg.header.version, Version::V1);
        assert_eq!(msg.decode::<COMMAND_LONG_DATA>().unwrap(), command_long());
    }

    #[test]
    fn corrupted_frame_is_dropped() {
        let mut bytes = wire_v2(&MavMessage::COMMAND_LONG(command_long()), 0);
        bytes[12] ^= 0xFF;

        let mut parser = FrameParser::new();
        let out = feed(&mut parser, &bytes);
        assert!(matches!(
            out.as_slice(),
            [ParseStatus::Dropped(DropReason::BadChecksum { msgid: 76, .. })]
        ));
        assert_eq!(parser.stats().frames_dropped, 1);
        assert_eq!(parser.stats().frames_received, 0);
    }

    #[test]
    fn garbage_before_frame_is_skipped() {
        let mut bytes = vec![0x00, 0x42, 0x13, 0x37];
        bytes.extend(wire_v2(&MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()), 0));

        let mut parser = FrameParser::new();
        let out = feed(&mut parser, &bytes);
        assert!(matches!(out.as_slice(), [ParseStatus::Complete(_)]));
        assert_eq!(parser.stats().bytes_skipped, 4);
    }

    #[test]
    fn signed_frame_signature_is_skipped() {
        let mut bytes = wire_v2(&MavMessage::COMMAND_LONG(command_long()), 5);
        bytes[2] = INCOMPAT_SIGNED;
        let body_end = bytes.len() - CHECKSUM_LEN;
        let crc = frame_checksum(&bytes[1..body_end], COMMAND_LONG_DATA::EXTRA_CRC);
        bytes[body_end..].copy_from_slice(&crc.to_le_bytes());
        bytes.extend([0xAA; SIGNATURE_LEN]);
        bytes.extend(wire_v2(&MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()), 6));

        let mut parser = FrameParser::new();
        let out = feed(&mut parser, &bytes);
        let [ParseStatus::Complete(signed), ParseStatus::Complete(next)] = out.as_slice() else {
            panic!("expected two frames, got {out:?}");
        };
        assert_eq!(signed.header.incompat_flags, INCOMPAT_SIGNED);
        assert_eq!(signed.decode::<COMMAND_LONG_DATA>().unwrap(), command_long());
        assert_eq!(next.msgid(), HEARTBEAT_DATA::ID);
    }

    #[test]
    fn unknown_incompat_flags_are_dropped() {
        let mut bytes = wire_v2(&MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()), 0);
        bytes[2] = 0x02;

        let mut parser = FrameParser::new();
        let out = feed(&mut parser, &bytes[..1 + HEADER_LEN_V2]);
        assert_eq!(
            out,
            vec![ParseStatus::Dropped(DropReason::UnsupportedFlags { flags: 0x02 })]
        );
        assert!(!parser.in_frame());
    }

    #[test]
    fn unknown_msgid_needs_vendor_registration() {
        let mut msg = Message::new(10_000, vec![1, 2, 3]).with_source(1, 1);
        finalize(&mut msg, 0, 77).unwrap();
        let mut bytes = BytesMut::new();
        encode_message(&msg, &mut bytes);

        let mut parser = FrameParser::new();
        assert_eq!(
            feed(&mut parser, &bytes),
            vec![ParseStatus::Dropped(DropReason::UnknownMessage { msgid: 10_000 })]
        );

        parser
            .dialect_mut()
            .insert(MessageInfo::new(10_000, "VENDOR_STATUS", 77));
        let out = feed(&mut parser, &bytes);
        let [ParseStatus::Complete(parsed)] = out.as_slice() else {
            panic!("expected one frame, got {out:?}");
        };
        assert_eq!(parsed, &msg);
    }

    #[test]
    fn back_to_back_frames() {
        let mut bytes = Vec::new();
        for seq in 0..5u8 {
            bytes.extend(wire_v2(&MavMessage::SERVO_OUTPUT_RAW(servo_output()), seq));
        }

        let mut parser = FrameParser::new();
        let seqs: Vec<u8> = feed(&mut parser, &bytes)
            .into_iter()
            .map(|status| match status {
                ParseStatus::Complete(msg) => msg.seq(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn reset_discards_partial_frame() {
        let bytes = wire_v2(&MavMessage::HEARTBEAT(HEARTBEAT_DATA::default()), 0);
        let mut parser = FrameParser::new();
        feed(&mut parser, &bytes[..6]);
        assert!(parser.in_frame());

        parser.reset();
        assert!(!parser.in_frame());
        assert_eq!(parser.stats(), ParserStats::default());
        assert!(matches!(feed(&mut parser, &bytes).as_slice(), [ParseStatus::Complete(_)]));
    }
}
