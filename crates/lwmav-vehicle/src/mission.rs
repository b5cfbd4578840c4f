//! Mission protocol transfers.
//!
//! Upload is vehicle-driven: after MISSION_COUNT the autopilot asks for each
//! item by sequence number (MISSION_REQUEST_INT, or the legacy
//! MISSION_REQUEST) and closes the transfer with MISSION_ACK.

use lwmav_frame::common::{
    MavCmd, MavFrame, MavMissionResult, MavMissionType, MISSION_ACK_DATA, MISSION_CLEAR_ALL_DATA,
    MISSION_COUNT_DATA, MISSION_ITEM_INT_DATA, MISSION_REQUEST_DATA, MISSION_REQUEST_INT_DATA,
};
use lwmav_frame::{Message, MessageData};
use tracing::{debug, warn};

use crate::action::{Action, ActionContext, Continuation};
use crate::command::Command;
use crate::error::Error;
use crate::vehicle::Vehicle;

/// Most items one MISSION_COUNT can announce.
pub const MAX_MISSION_ITEMS: usize = u16::MAX as usize;

/// A NAV_WAYPOINT at `lat`/`lon` (degrees * 1e7) and `alt` metres above home.
pub fn waypoint(lat: i32, lon: i32, alt: f32) -> MISSION_ITEM_INT_DATA {
    MISSION_ITEM_INT_DATA {
        x: lat,
        y: lon,
        z: alt,
        command: MavCmd::MAV_CMD_NAV_WAYPOINT,
        frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
        autocontinue: 1,
        ..Default::default()
    }
}

/// Accept an ACCEPTED ack; fail on anything else.
pub fn default_finalize(ctx: &mut ActionContext<'_>, ack: &MISSION_ACK_DATA) -> Continuation {
    if ack.mavtype != MavMissionResult::MAV_MISSION_ACCEPTED {
        warn!(result = ?ack.mavtype, mission_type = ?ack.mission_type, "mission transfer rejected");
        ctx.fail(Error::Rejected(format!("mission result {:?}", ack.mavtype)));
    }
    Continuation::Stop
}

impl Command {
    /// Upload `items` as the vehicle's `mission_type` list.
    ///
    /// Sequence numbers, targets and mission type are filled in per item
    /// when it is requested.
    pub fn mission_upload(
        vehicle: &Vehicle,
        items: Vec<MISSION_ITEM_INT_DATA>,
        mission_type: MavMissionType,
    ) -> Self {
        Self::mission_upload_with(vehicle, items, mission_type, default_finalize)
    }

    /// [`mission_upload`](Self::mission_upload) with a custom MISSION_ACK
    /// handler.
    ///
    /// More than [`MAX_MISSION_ITEMS`] items cannot be announced; `run`
    /// then fails with [`Error::BadParam`] before anything is sent.
    pub fn mission_upload_with<F>(
        vehicle: &Vehicle,
        items: Vec<MISSION_ITEM_INT_DATA>,
        mission_type: MavMissionType,
        mut finalize: F,
    ) -> Self
    where
        F: FnMut(&mut ActionContext<'_>, &MISSION_ACK_DATA) -> Continuation + 'static,
    {
        let target_system = vehicle.target_system();
        let target_component = vehicle.target_component();
        let len = items.len();
        let count = u16::try_from(len).ok();

        let action = Action::new(move |ctx| {
            let Some(count) = count else {
                warn!(len, max = MAX_MISSION_ITEMS, "mission too long to upload");
                return Err(Error::BadParam(format!(
                    "{len} mission items, at most {MAX_MISSION_ITEMS} fit in MISSION_COUNT"
                )));
            };
            debug!(count, ?mission_type, "mission upload start");
            ctx.send_payload(&MISSION_COUNT_DATA {
                target_system,
                target_component,
                count,
                mission_type,
                ..Default::default()
            })
        })
        .then(
            &[
                MISSION_REQUEST_INT_DATA::ID,
                MISSION_REQUEST_DATA::ID,
                MISSION_ACK_DATA::ID,
            ],
            move |ctx, msg| {
                if msg.is::<MISSION_ACK_DATA>() {
                    return finish(ctx, msg, mission_type, &mut finalize);
                }
                let decoded = if msg.is::<MISSION_REQUEST_INT_DATA>() {
                    msg.decode::<MISSION_REQUEST_INT_DATA>()
                        .map(|req| (req.seq, req.mission_type))
                } else {
                    msg.decode::<MISSION_REQUEST_DATA>()
                        .map(|req| (req.seq, req.mission_type))
                };
                let Ok((seq, requested_type)) = decoded else {
                    return Continuation::Continue;
                };
                if requested_type != mission_type {
                    return Continuation::Continue;
                }

                let Some(item) = items.get(usize::from(seq)) else {
                    warn!(seq, len, "mission item request out of range");
                    ctx.fail(Error::BadParam(format!(
                        "mission item {seq} requested, only {len} uploaded"
                    )));
                    return Continuation::Stop;
                };
                let item = MISSION_ITEM_INT_DATA {
                    target_system,
                    target_component,
                    seq,
                    mission_type,
                    ..item.clone()
                };
                debug!(seq, "sending mission item");
                match ctx.send_payload(&item) {
                    Ok(()) => Continuation::Continue,
                    Err(err) => {
                        ctx.fail(err);
                        Continuation::Stop
                    }
                }
            },
        );
        Self::from_action(action)
    }

    /// Erase the vehicle's `mission_type` list.
    pub fn mission_clear_all(vehicle: &Vehicle, mission_type: MavMissionType) -> Self {
        let clear = MISSION_CLEAR_ALL_DATA {
            target_system: vehicle.target_system(),
            target_component: vehicle.target_component(),
            mission_type,
        };
        let mut finalize = default_finalize;
        let action = Action::new(move |ctx| ctx.send_payload(&clear)).then(
            &[MISSION_ACK_DATA::ID],
            move |ctx, msg| finish(ctx, msg, mission_type, &mut finalize),
        );
        Self::from_action(action)
    }

    /// The MISSION_ACK that closed a mission transfer, if any.
    pub fn mission_ack(&self) -> Option<MISSION_ACK_DATA> {
        self.result()
            .and_then(|msg| msg.decode::<MISSION_ACK_DATA>().ok())
    }
}

fn finish<F>(
    ctx: &mut ActionContext<'_>,
    msg: &Message,
    mission_type: MavMissionType,
    finalize: &mut F,
) -> Continuation
where
    F: FnMut(&mut ActionContext<'_>, &MISSION_ACK_DATA) -> Continuation,
{
    let Ok(ack) = msg.decode::<MISSION_ACK_DATA>() else {
        return Continuation::Continue;
    };
    if ack.mission_type != mission_type {
        return Continuation::Continue;
    }
    ctx.set_result(msg.clone());
    finalize(ctx, &ack)
}
