//! Loopback fixtures shared by unit tests.

use bytes::BytesMut;
use lwmav_frame::common::{MavAutopilot, MavState, MavType, HEARTBEAT_DATA};
use lwmav_frame::{encode_message, finalize, FrameParser, Message, MessageData, ParseStatus};
use lwmav_transport::{LoopbackLink, TransportParams};

use crate::vehicle::Vehicle;

pub(crate) const PEER_SYSTEM: u8 = 1;
pub(crate) const PEER_COMPONENT: u8 = 1;

/// An open vehicle wired to a loopback link.
pub(crate) fn loopback_vehicle() -> (Vehicle, LoopbackLink) {
    let link = LoopbackLink::new();
    let mut vehicle = Vehicle::new();
    vehicle.open(&TransportParams::Loopback(link.clone())).unwrap();
    (vehicle, link)
}

/// Wire bytes for `payload` as sent by the peer autopilot.
pub(crate) fn frame<T: MessageData>(payload: &T) -> Vec<u8> {
    let mut msg = Message::from_data(payload).with_source(PEER_SYSTEM, PEER_COMPONENT);
    finalize(&mut msg, 0, T::EXTRA_CRC).unwrap();
    let mut buf = BytesMut::new();
    encode_message(&msg, &mut buf);
    buf.to_vec()
}

/// Every message the vehicle has written to `link` since the last call.
pub(crate) fn sent_messages(link: &LoopbackLink) -> Vec<Message> {
    let mut parser = FrameParser::new();
    let mut out = Vec::new();
    for chunk in link.take_sent() {
        for byte in chunk {
            if let ParseStatus::Complete(msg) = parser.parse_byte(byte) {
                out.push(msg);
            }
        }
    }
    out
}

/// Sent messages of type `T`, decoded.
pub(crate) fn sent<T: MessageData>(link: &LoopbackLink) -> Vec<T> {
    sent_messages(link)
        .iter()
        .filter(|msg| msg.msgid() == T::ID)
        .map(|msg| msg.decode::<T>().unwrap())
        .collect()
}

/// Spin until every injected chunk has been read and parsed. Assumes one
/// frame per chunk.
pub(crate) fn drain(vehicle: &mut Vehicle, link: &LoopbackLink) {
    while link.pending_chunks() > 0 {
        vehicle.spin_once().unwrap();
    }
    vehicle.spin_once().unwrap();
}

/// A ground-station heartbeat.
pub(crate) fn heartbeat() -> HEARTBEAT_DATA {
    HEARTBEAT_DATA {
        mavtype: MavType::MAV_TYPE_GCS,
        autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
        system_status: MavState::MAV_STATE_ACTIVE,
        mavlink_version: 3,
        ..Default::default()
    }
}
