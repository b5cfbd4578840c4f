//! Blocking and fire-and-forget convenience operations on [`Vehicle`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use lwmav_frame::common::{
    MavCmd, MavMissionType, MavModeFlag, MavResult, COMMAND_ACK_DATA, COMMAND_LONG_DATA,
    HOME_POSITION_DATA, MISSION_ITEM_INT_DATA,
};
use lwmav_frame::{Message, MessageData};
use serde::Serialize;
use tracing::{info, warn};

use crate::action::{ActionContext, ActionStatus, Continuation};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::vehicle::Vehicle;

/// How long [`Vehicle::get_home_position`] waits for a reply.
pub const HOME_POSITION_TIMEOUT: Duration = Duration::from_secs(1);

/// COMPONENT_ARM_DISARM param2 value that bypasses pre-arm checks.
pub const ARM_FORCE_MAGIC: f32 = 21196.0;

/// ArduCopter flight modes (custom_mode values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CopterMode {
    Stabilize,
    Acro,
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Circle,
    Land,
}

impl CopterMode {
    pub const ALL: [CopterMode; 9] = [
        Self::Stabilize,
        Self::Acro,
        Self::AltHold,
        Self::Auto,
        Self::Guided,
        Self::Loiter,
        Self::Rtl,
        Self::Circle,
        Self::Land,
    ];

    pub fn code(self) -> u32 {
        match self {
            Self::Stabilize => 0,
            Self::Acro => 1,
            Self::AltHold => 2,
            Self::Auto => 3,
            Self::Guided => 4,
            Self::Loiter => 5,
            Self::Rtl => 6,
            Self::Circle => 7,
            Self::Land => 9,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stabilize => "STABILIZE",
            Self::Acro => "ACRO",
            Self::AltHold => "ALT_HOLD",
            Self::Auto => "AUTO",
            Self::Guided => "GUIDED",
            Self::Loiter => "LOITER",
            Self::Rtl => "RTL",
            Self::Circle => "CIRCLE",
            Self::Land => "LAND",
        }
    }
}

impl fmt::Display for CopterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u32> for CopterMode {
    type Error = Error;

    fn try_from(code: u32) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.code() == code)
            .ok_or_else(|| Error::BadParam(format!("unknown copter mode {code}")))
    }
}

/// Accepts a mode name (any case, `-` or `_`) or its numeric value.
impl FromStr for CopterMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(code) = s.parse::<u32>() {
            return Self::try_from(code);
        }
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|mode| mode.name() == wanted)
            .ok_or_else(|| Error::BadParam(format!("unknown copter mode {s:?}")))
    }
}

// Resolve on `reply`; fail on a negative ack for `command`.
fn await_reply(
    command: MavCmd,
    reply: u32,
) -> impl FnMut(&mut ActionContext<'_>, &Message) -> Continuation {
    move |ctx, msg| {
        if msg.msgid() == reply {
            ctx.set_result(msg.clone());
            return Continuation::Stop;
        }
        if !msg.is::<COMMAND_ACK_DATA>() {
            return Continuation::Continue;
        }
        let Ok(ack) = msg.decode::<COMMAND_ACK_DATA>() else {
            return Continuation::Continue;
        };
        match ack.result {
            MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS => {
                Continuation::Continue
            }
            _ if ack.command != command => Continuation::Continue,
            outcome => {
                ctx.fail(Error::Rejected(format!("{command:?}: {outcome:?}")));
                ctx.set_result(msg.clone());
                Continuation::Stop
            }
        }
    }
}

fn conclude(command: &mut Command, vehicle: &mut Vehicle, timeout: Duration) -> Result<()> {
    match command.execute_timeout(vehicle, timeout)? {
        ActionStatus::Finished => Ok(()),
        _ => Err(command.take_failure().unwrap_or(Error::Stopped)),
    }
}

impl Vehicle {
    /// Ask the vehicle to send message `msgid` once and wait for it.
    ///
    /// Waits at most [`command_timeout`](Vehicle::command_timeout).
    pub fn request_message(&mut self, msgid: u32) -> Result<Message> {
        let request = COMMAND_LONG_DATA {
            param1: msgid as f32,
            ..command_long(MavCmd::MAV_CMD_REQUEST_MESSAGE)
        };
        let mut command = Command::long(self, request).then(
            &[msgid, COMMAND_ACK_DATA::ID],
            await_reply(MavCmd::MAV_CMD_REQUEST_MESSAGE, msgid),
        );
        let timeout = self.command_timeout();
        conclude(&mut command, self, timeout)?;
        command.result().ok_or(Error::NoData)
    }

    /// Ask for `msgid` every `interval` and route each arrival to
    /// `callback`.
    ///
    /// Returns the still-executing command; later spins drive it, and
    /// [`Action::cancel`](crate::Action::cancel) stops listening.
    pub fn request_message_periodic<F>(
        &mut self,
        msgid: u32,
        interval: Duration,
        callback: F,
    ) -> Result<Command>
    where
        F: FnMut(&mut ActionContext<'_>, &Message) -> Continuation + 'static,
    {
        let request = COMMAND_LONG_DATA {
            param1: msgid as f32,
            param2: interval.as_micros() as f32,
            ..command_long(MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL)
        };
        let mut command = Command::long(self, request).then(&[msgid], callback);
        command.execute_async(self)?;
        info!(msgid, interval_us = interval.as_micros() as u64, "periodic request started");
        Ok(command)
    }

    /// Fetch HOME_POSITION, waiting at most [`HOME_POSITION_TIMEOUT`].
    pub fn get_home_position(&mut self) -> Result<HOME_POSITION_DATA> {
        let request = command_long(MavCmd::MAV_CMD_GET_HOME_POSITION);
        let mut command = Command::long(self, request).then(
            &[HOME_POSITION_DATA::ID, COMMAND_ACK_DATA::ID],
            await_reply(MavCmd::MAV_CMD_GET_HOME_POSITION, HOME_POSITION_DATA::ID),
        );
        conclude(&mut command, self, HOME_POSITION_TIMEOUT)?;
        let msg = command.result().ok_or(Error::NoData)?;
        Ok(msg.decode::<HOME_POSITION_DATA>()?)
    }

    /// Switch flight mode and wait for the acknowledgement.
    pub fn set_mode_arducopter(&mut self, mode: CopterMode) -> Result<()> {
        let timeout = self.command_timeout();
        let mut command = Command::long(self, set_mode(mode)).with_ack();
        conclude(&mut command, self, timeout)?;
        info!(%mode, "mode changed");
        Ok(())
    }

    /// Send the mode change without waiting.
    pub fn set_mode_arducopter_async(&mut self, mode: CopterMode) -> Result<()> {
        Command::long(self, set_mode(mode)).execute_async(self)
    }

    /// Arm (`arm == true`) or disarm, and wait for the acknowledgement.
    /// `force` bypasses pre-arm and landed checks.
    pub fn arm_disarm(&mut self, arm: bool, force: bool) -> Result<()> {
        let timeout = self.command_timeout();
        let mut command = Command::long(self, arm_disarm(arm, force)).with_ack();
        conclude(&mut command, self, timeout)?;
        info!(arm, force, "arm state changed");
        Ok(())
    }

    pub fn arm_disarm_async(&mut self, arm: bool, force: bool) -> Result<()> {
        Command::long(self, arm_disarm(arm, force)).execute_async(self)
    }

    /// Upload `items` and wait for the final MISSION_ACK. The whole transfer
    /// must finish within `timeout`.
    pub fn mission_upload(
        &mut self,
        items: Vec<MISSION_ITEM_INT_DATA>,
        mission_type: MavMissionType,
        timeout: Duration,
    ) -> Result<()> {
        let mut command = Command::mission_upload(self, items, mission_type);
        conclude(&mut command, self, timeout)
    }

    pub fn mission_clear_all(&mut self, mission_type: MavMissionType) -> Result<()> {
        let timeout = self.command_timeout();
        let mut command = Command::mission_clear_all(self, mission_type);
        conclude(&mut command, self, timeout).map_err(|err| {
            warn!(error = %err, ?mission_type, "mission clear failed");
            err
        })
    }
}

// Targets stay zero so that `Command::long` fills them from the vehicle.
fn command_long(command: MavCmd) -> COMMAND_LONG_DATA {
    COMMAND_LONG_DATA {
        command,
        ..Default::default()
    }
}

fn set_mode(mode: CopterMode) -> COMMAND_LONG_DATA {
    COMMAND_LONG_DATA {
        param1: f32::from(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits()),
        param2: mode.code() as f32,
        ..command_long(MavCmd::MAV_CMD_DO_SET_MODE)
    }
}

fn arm_disarm(arm: bool, force: bool) -> COMMAND_LONG_DATA {
    COMMAND_LONG_DATA {
        param1: if arm { 1.0 } else { 0.0 },
        param2: if force { ARM_FORCE_MAGIC } else { 0.0 },
        ..command_long(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM)
    }
}
