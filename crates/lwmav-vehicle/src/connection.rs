use std::fmt;

use bytes::BytesMut;
use lwmav_frame::{
    encode_message, finalize, Dialect, FrameParser, Message, ParseStatus, MAX_FRAME_LEN,
};
use lwmav_transport::{Transport, TransportKind, TransportParams, TransportRegistry};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

/// Capacity of the receive buffer. One transport read fills at most
/// `READ_BUFFER_SIZE - 1` bytes.
pub const READ_BUFFER_SIZE: usize = 512;

/// Default local identity (a ground station component).
pub const DEFAULT_SYSTEM_ID: u8 = 127;
pub const DEFAULT_COMPONENT_ID: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnStatus {
    Closed,
    Open,
    Error,
}

impl fmt::Display for ConnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::Error => f.write_str("in error"),
        }
    }
}

/// Link counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_sent: u64,
    pub bytes_skipped: u64,
}

struct ReadBuffer {
    data: [u8; READ_BUFFER_SIZE],
    pos: usize,
    len: usize,
}

impl ReadBuffer {
    fn new() -> Self {
        Self {
            data: [0; READ_BUFFER_SIZE],
            pos: 0,
            len: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.len
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.len = 0;
    }
}

/// Message-level link over one transport.
///
/// Receive is byte-granular: buffered input is fed to the frame parser one
/// byte at a time, and the transport is read at most once per call, so any
/// chunking of the underlying stream is tolerated.
pub struct Connection {
    status: ConnStatus,
    transports: TransportRegistry,
    transport: Option<Box<dyn Transport>>,
    input: ReadBuffer,
    parser: FrameParser,
    output: BytesMut,
    seq: u8,
    system_id: u8,
    component_id: u8,
    frames_sent: u64,
}

impl Connection {
    pub fn new() -> Self {
        Self::with_transports(TransportRegistry::with_defaults())
    }

    /// A connection that resolves backends through `transports`.
    pub fn with_transports(transports: TransportRegistry) -> Self {
        Self {
            status: ConnStatus::Closed,
            transports,
            transport: None,
            input: ReadBuffer::new(),
            parser: FrameParser::new(),
            output: BytesMut::with_capacity(MAX_FRAME_LEN),
            seq: 0,
            system_id: DEFAULT_SYSTEM_ID,
            component_id: DEFAULT_COMPONENT_ID,
            frames_sent: 0,
        }
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ConnStatus::Open
    }

    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.transport.as_ref().map(|t| t.kind())
    }

    pub fn transports_mut(&mut self) -> &mut TransportRegistry {
        &mut self.transports
    }

    pub fn dialect(&self) -> &Dialect {
        self.parser.dialect()
    }

    pub fn dialect_mut(&mut self) -> &mut Dialect {
        self.parser.dialect_mut()
    }

    /// Source ids stamped on outbound messages that leave them zero.
    pub fn set_identity(&mut self, system_id: u8, component_id: u8) {
        self.system_id = system_id;
        self.component_id = component_id;
    }

    pub fn identity(&self) -> (u8, u8) {
        (self.system_id, self.component_id)
    }

    pub fn stats(&self) -> ConnectionStats {
        let parser = self.parser.stats();
        ConnectionStats {
            frames_received: parser.frames_received,
            frames_dropped: parser.frames_dropped,
            frames_sent: self.frames_sent,
            bytes_skipped: parser.bytes_skipped,
        }
    }

    /// Bind and open a transport for `params`.
    ///
    /// An already open transport is closed first. On failure the connection
    /// is left in [`ConnStatus::Error`] without a transport.
    pub fn open(&mut self, params: &TransportParams) -> Result<()> {
        let kind = params.kind();
        let mut transport = self
            .transports
            .create(kind)
            .ok_or(Error::NotSupported(kind))?;

        if self.transport.is_some() {
            debug!("reopening connection");
            self.close();
        }

        self.parser.reset();
        self.input.reset();
        self.seq = 0;
        self.frames_sent = 0;

        if let Err(err) = transport.open(params) {
            warn!(kind = %kind, error = %err, "transport open failed");
            self.status = ConnStatus::Error;
            return Err(err.into());
        }

        info!(kind = %kind, "connection open");
        self.transport = Some(transport);
        self.status = ConnStatus::Open;
        Ok(())
    }

    /// Finalize and transmit one message.
    ///
    /// Zero source ids are replaced by the connection identity; the sequence
    /// number and checksum are always assigned here.
    pub fn send(&mut self, msg: &mut Message) -> Result<()> {
        if !self.is_open() {
            return Err(Error::BadConnection(self.status));
        }
        let crc_extra = self
            .parser
            .dialect()
            .crc_extra(msg.msgid())
            .ok_or_else(|| Error::BadMessage(format!("msgid {} is not in the dialect", msg.msgid())))?;

        if msg.header.sysid == 0 {
            msg.header.sysid = self.system_id;
        }
        if msg.header.compid == 0 {
            msg.header.compid = self.component_id;
        }
        finalize(msg, self.seq, crc_extra)?;

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::BadConnection(self.status));
        };
        self.output.clear();
        let len = encode_message(msg, &mut self.output);
        transport.send(&self.output)?;

        trace!(msgid = msg.msgid(), seq = msg.seq(), len, "frame sent");
        self.seq = self.seq.wrapping_add(1);
        self.frames_sent += 1;
        Ok(())
    }

    /// Return the next complete message, or [`Error::NoData`] after one
    /// transport read if none is buffered yet.
    pub fn receive(&mut self) -> Result<Message> {
        if !self.is_open() {
            return Err(Error::BadConnection(self.status));
        }

        if !self.input.is_empty() {
            let mut run_start = self.input.pos;
            while self.input.pos < self.input.len {
                let byte = self.input.data[self.input.pos];
                self.input.pos += 1;
                match self.parser.parse_byte(byte) {
                    ParseStatus::Complete(msg) => return Ok(msg),
                    ParseStatus::Dropped(reason) => {
                        warn!(
                            dropped = self.parser.stats().frames_dropped,
                            bytes = self.input.pos - run_start,
                            %reason,
                            "frame dropped"
                        );
                        run_start = self.input.pos;
                    }
                    ParseStatus::Incomplete => {}
                }
            }
        }

        let Some(transport) = self.transport.as_mut() else {
            return Err(Error::BadConnection(self.status));
        };
        self.input.reset();
        let n = transport.receive(&mut self.input.data[..READ_BUFFER_SIZE - 1])?;
        self.input.len = n;
        if n > 0 {
            trace!(bytes = n, "input buffered");
        }
        Err(Error::NoData)
    }

    /// Release the transport. Closing a closed connection does nothing.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
            info!(kind = %transport.kind(), "connection closed");
        }
        self.status = ConnStatus::Closed;
        self.input.reset();
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status)
            .field("transport", &self.transport_kind())
            .field("seq", &self.seq)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use lwmav_frame::common::{MavCmd, MavMessage, COMMAND_LONG_DATA, HEARTBEAT_DATA, SERVO_OUTPUT_RAW_DATA};
    use lwmav_frame::{mavlink, MavHeader, MessageData};
    use lwmav_transport::LoopbackLink;

    use super::*;
    use crate::test_support::heartbeat;

    fn open_loopback() -> (Connection, LoopbackLink) {
        let link = LoopbackLink::new();
        let mut conn = Connection::new();
        conn.open(&TransportParams::Loopback(link.clone())).unwrap();
        (conn, link)
    }

    /// Frame bytes as written by the `mavlink` crate itself.
    fn wire(msg: &MavMessage, seq: u8) -> Vec<u8> {
        let header = MavHeader {
            system_id: 1,
            component_id: 1,
            sequence: seq,
        };
        let mut buf = Vec::new();
        mavlink::write_v2_msg(&mut buf, header, msg).unwrap();
        buf
    }

    fn heartbeat_bytes(seq: u8) -> Vec<u8> {
        wire(&MavMessage::HEARTBEAT(heartbeat()), seq)
    }

    fn takeoff() -> COMMAND_LONG_DATA {
        COMMAND_LONG_DATA {
            target_system: 1,
            target_component: 1,
            command: MavCmd::MAV_CMD_NAV_TAKEOFF,
            param7: 25.0,
            ..Default::default()
        }
    }

    fn receive_until_message(conn: &mut Connection, max_calls: usize) -> (Message, usize) {
        for call in 1..=max_calls {
            match conn.receive() {
                Ok(msg) => return (msg, call),
                Err(Error::NoData) => continue,
                Err(err) => panic!("unexpected error: {err}"),
            }
        }
        panic!("no message after {max_calls} calls");
    }

    /// Deliver `bytes` in chunks of every size from one byte to the whole
    /// frame and expect exactly one message each time.
    fn assert_any_chunking_yields_one_frame(bytes: &[u8], expected: &MavMessage) {
        for size in 1..=bytes.len() {
            let (mut conn, link) = open_loopback();
            link.inject_chunked(bytes, size);
            let chunks = link.pending_chunks();
            assert_eq!(chunks, bytes.len().div_ceil(size));

            // One NoData per chunk read; the call after the last read parses it.
            for call in 1..=chunks {
                match conn.receive() {
                    Err(Error::NoData) => {}
                    other => panic!("chunk size {size}, call {call}: expected NoData, got {other:?}"),
                }
            }
            let msg = conn
                .receive()
                .unwrap_or_else(|err| panic!("chunk size {size}: {err}"));
            assert_eq!(&msg.to_mav().unwrap(), expected, "chunk size {size}");

            assert!(matches!(conn.receive(), Err(Error::NoData)), "chunk size {size}");
            let stats = conn.stats();
            assert_eq!(stats.frames_received, 1, "chunk size {size}");
            assert_eq!(stats.frames_dropped, 0, "chunk size {size}");
        }
    }

    #[test]
    fn created_closed() {
        let mut conn = Connection::new();
        assert_eq!(conn.status(), ConnStatus::Closed);
        assert!(matches!(
            conn.receive(),
            Err(Error::BadConnection(ConnStatus::Closed))
        ));
        let mut msg = Message::from_data(&heartbeat());
        assert!(matches!(conn.send(&mut msg), Err(Error::BadConnection(_))));
    }

    #[test]
    fn unregistered_kind_is_not_supported() {
        let mut conn = Connection::with_transports(TransportRegistry::new());
        let err = conn
            .open(&TransportParams::Loopback(LoopbackLink::new()))
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported(TransportKind::Loopback)));
        assert_eq!(conn.status(), ConnStatus::Closed);
    }

    #[test]
    fn failed_open_leaves_error_status() {
        let mut conn = Connection::new();
        let err = conn
            .open(&TransportParams::Tcp {
                host: "127.0.0.1".into(),
                port: 1,
            })
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(conn.status(), ConnStatus::Error);
        assert!(matches!(
            conn.receive(),
            Err(Error::BadConnection(ConnStatus::Error))
        ));
    }

    #[test]
    fn send_stamps_identity_and_sequence() {
        let (mut conn, link) = open_loopback();
        conn.set_identity(200, 190);

        for _ in 0..2 {
            let mut msg = Message::from_data(&heartbeat());
            conn.send(&mut msg).unwrap();
        }
        let sent = link.take_sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0][4], 0);
        assert_eq!(sent[1][4], 1);
        assert_eq!(sent[0][5], 200);
        assert_eq!(sent[0][6], 190);
        assert_eq!(conn.stats().frames_sent, 2);
    }

    #[test]
    fn sent_bytes_match_mavlink_writer() {
        let (mut conn, link) = open_loopback();
        conn.set_identity(1, 1);
        conn.send(&mut Message::from_data(&takeoff())).unwrap();

        let sent = link.take_sent();
        assert_eq!(sent, vec![wire(&MavMessage::COMMAND_LONG(takeoff()), 0)]);
    }

    #[test]
    fn send_unknown_message_is_bad_message() {
        let (mut conn, _link) = open_loopback();
        let mut msg = Message::new(40_000, vec![1u8]);
        assert!(matches!(conn.send(&mut msg), Err(Error::BadMessage(_))));
    }

    #[test]
    fn roundtrip_through_reflection() {
        let (mut conn, link) = open_loopback();
        let hb = HEARTBEAT_DATA {
            custom_mode: 4,
            ..heartbeat()
        };
        let mut sent_hb = Message::from_data(&hb);
        conn.send(&mut sent_hb).unwrap();
        let mut sent_cmd = Message::from_data(&takeoff());
        conn.send(&mut sent_cmd).unwrap();
        link.reflect();

        let (received, _) = receive_until_message(&mut conn, 3);
        assert_eq!(received, sent_hb);
        assert_eq!(received.decode::<HEARTBEAT_DATA>().unwrap(), hb);

        let (received, _) = receive_until_message(&mut conn, 3);
        assert_eq!(received, sent_cmd);
        assert_eq!(received.decode::<COMMAND_LONG_DATA>().unwrap(), takeoff());
    }

    #[test]
    fn heartbeat_survives_every_chunk_size() {
        let bytes = heartbeat_bytes(9);
        assert_any_chunking_yields_one_frame(&bytes, &MavMessage::HEARTBEAT(heartbeat()));
    }

    #[test]
    fn command_long_survives_every_chunk_size() {
        let expected = MavMessage::COMMAND_LONG(takeoff());
        let bytes = wire(&expected, 17);
        assert_any_chunking_yields_one_frame(&bytes, &expected);
    }

    #[test]
    fn servo_output_raw_is_delivered() {
        let (mut conn, link) = open_loopback();
        let servo = SERVO_OUTPUT_RAW_DATA {
            time_usec: 5_000_000,
            servo1_raw: 1500,
            servo4_raw: 1950,
            ..Default::default()
        };
        link.inject(wire(&MavMessage::SERVO_OUTPUT_RAW(servo.clone()), 3));

        let (msg, _) = receive_until_message(&mut conn, 2);
        assert_eq!(msg.msgid(), SERVO_OUTPUT_RAW_DATA::ID);
        assert_eq!(msg.decode::<SERVO_OUTPUT_RAW_DATA>().unwrap(), servo);
        assert_eq!(conn.stats().frames_dropped, 0);
    }

    #[test]
    fn corrupted_frame_is_counted_not_fatal() {
        let (mut conn, link) = open_loopback();
        let mut bad = heartbeat_bytes(1);
        let last = bad.len() - 1;
        bad[last] ^= 0x55;
        let mut stream = bad;
        stream.extend_from_slice(&heartbeat_bytes(2));
        link.inject(stream);

        let (msg, _) = receive_until_message(&mut conn, 3);
        assert_eq!(msg.seq(), 2);
        assert_eq!(conn.stats().frames_dropped, 1);
    }

    #[test]
    fn several_frames_in_one_read() {
        let (mut conn, link) = open_loopback();
        let mut stream = heartbeat_bytes(0);
        stream.extend_from_slice(&heartbeat_bytes(1));
        link.inject(stream);

        assert!(matches!(conn.receive(), Err(Error::NoData)));
        assert_eq!(conn.receive().unwrap().seq(), 0);
        assert_eq!(conn.receive().unwrap().seq(), 1);
        assert!(matches!(conn.receive(), Err(Error::NoData)));
        assert_eq!(link.receive_calls(), 2);
    }

    #[test]
    fn transport_failure_is_io() {
        let (mut conn, link) = open_loopback();
        link.fail_receives(true);
        let err = conn.receive().unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut conn, link) = open_loopback();
        conn.close();
        conn.close();
        assert_eq!(conn.status(), ConnStatus::Closed);
        assert!(!link.is_open());
        assert_eq!(conn.transport_kind(), None);
    }

    #[test]
    fn reopen_resets_sequence() {
        let (mut conn, link) = open_loopback();
        let mut msg = Message::from_data(&heartbeat());
        conn.send(&mut msg).unwrap();
        conn.open(&TransportParams::Loopback(link.clone())).unwrap();
        let mut msg = Message::from_data(&heartbeat());
        conn.send(&mut msg).unwrap();
        assert_eq!(msg.seq(), 0);
    }
}
