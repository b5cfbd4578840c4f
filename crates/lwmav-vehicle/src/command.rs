//! Protocol commands built on [`Action`].
//!
//! A [`Command`] sends a COMMAND_LONG or COMMAND_INT from its `run`
//! callback and, once COMMAND_ACK is subscribed with
//! [`with_ack`](Command::with_ack), resolves on the matching
//! acknowledgement. Without subscriptions a command is fire-and-forget.

use std::ops::{Deref, DerefMut};

use lwmav_frame::common::{MavCmd, MavResult, COMMAND_ACK_DATA, COMMAND_INT_DATA, COMMAND_LONG_DATA};
use lwmav_frame::{Message, MessageData};
use tracing::{debug, warn};

use crate::action::{Action, ActionContext, Continuation, Event};
use crate::error::Error;
use crate::vehicle::Vehicle;

/// Confirmation value for the `attempt`-th transmission (1-based).
pub fn confirmation(attempt: u32) -> u8 {
    attempt.saturating_sub(1).min(u32::from(u8::MAX)) as u8
}

pub struct Command {
    action: Action,
    command: Option<MavCmd>,
}

impl Command {
    /// A COMMAND_LONG. Zero target ids are filled from the vehicle.
    pub fn long(vehicle: &Vehicle, mut command: COMMAND_LONG_DATA) -> Self {
        if command.target_system == 0 {
            command.target_system = vehicle.target_system();
        }
        if command.target_component == 0 {
            command.target_component = vehicle.target_component();
        }
        let id = command.command;
        let action = Action::new(move |ctx| {
            let mut outgoing = command.clone();
            outgoing.confirmation = confirmation(ctx.attempts());
            debug!(command = ?id, confirmation = outgoing.confirmation, "sending command_long");
            ctx.send_payload(&outgoing)
        });
        Self::with_default_ack(action, id)
    }

    /// A COMMAND_INT. Zero target ids are filled from the vehicle.
    pub fn int(vehicle: &Vehicle, mut command: COMMAND_INT_DATA) -> Self {
        if command.target_system == 0 {
            command.target_system = vehicle.target_system();
        }
        if command.target_component == 0 {
            command.target_component = vehicle.target_component();
        }
        let id = command.command;
        let action = Action::new(move |ctx| {
            debug!(command = ?id, attempt = ctx.attempts(), "sending command_int");
            ctx.send_payload(&command)
        });
        Self::with_default_ack(action, id)
    }

    fn with_default_ack(action: Action, command: MavCmd) -> Self {
        let action = action.then(&[], move |ctx, msg| default_ack(ctx, msg, command));
        Self {
            action,
            command: Some(command),
        }
    }

    /// Wrap an action that is not a single COMMAND_* request.
    pub(crate) fn from_action(action: Action) -> Self {
        Self {
            action,
            command: None,
        }
    }

    /// Wait for the matching COMMAND_ACK.
    pub fn with_ack(self) -> Self {
        self.upon(&[COMMAND_ACK_DATA::ID])
    }

    /// Subscribe `ids` without adding a callback; messages reach the
    /// existing `then` chain.
    pub fn upon(mut self, ids: &[u32]) -> Self {
        self.action = self.action.upon(ids);
        self
    }

    /// Handle `ids` with `then`, ahead of the default acknowledgement logic.
    pub fn then<F>(mut self, ids: &[u32], then: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>, &Message) -> Continuation + 'static,
    {
        self.action = self.action.then(ids, then);
        self
    }

    pub fn except<F>(mut self, ids: &[u32], except: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>, Event<'_>) + 'static,
    {
        self.action = self.action.except(ids, except);
        self
    }

    pub fn on_timeout<F>(mut self, timeout: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>) + 'static,
    {
        self.action = self.action.on_timeout(timeout);
        self
    }

    /// The MAV_CMD id, if this is a COMMAND_LONG / COMMAND_INT.
    pub fn command_id(&self) -> Option<MavCmd> {
        self.command
    }

    /// The acknowledgement that resolved the command, if any.
    pub fn ack(&self) -> Option<COMMAND_ACK_DATA> {
        self.action
            .result()
            .and_then(|msg| msg.decode::<COMMAND_ACK_DATA>().ok())
    }

    pub fn into_action(self) -> Action {
        self.action
    }
}

impl Deref for Command {
    type Target = Action;

    fn deref(&self) -> &Action {
        &self.action
    }
}

impl DerefMut for Command {
    fn deref_mut(&mut self) -> &mut Action {
        &mut self.action
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("command", &self.command)
            .field("action", &self.action)
            .finish()
    }
}

fn default_ack(ctx: &mut ActionContext<'_>, msg: &Message, command: MavCmd) -> Continuation {
    if !msg.is::<COMMAND_ACK_DATA>() {
        return Continuation::Continue;
    }
    let Ok(ack) = msg.decode::<COMMAND_ACK_DATA>() else {
        return Continuation::Continue;
    };
    if ack.command != command {
        return Continuation::Continue;
    }
    // Acks addressed to another ground station are not ours.
    let local = ctx.vehicle().system_id();
    if ack.target_system != 0 && ack.target_system != local {
        return Continuation::Continue;
    }

    match ack.result {
        MavResult::MAV_RESULT_ACCEPTED => {
            ctx.set_result(msg.clone());
            Continuation::Stop
        }
        MavResult::MAV_RESULT_IN_PROGRESS => {
            debug!(?command, progress = ack.progress, "command in progress");
            Continuation::Continue
        }
        outcome => {
            warn!(?command, ?outcome, "command rejected");
            ctx.fail(Error::Rejected(format!("{command:?}: {outcome:?}")));
            ctx.set_result(msg.clone());
            Continuation::Stop
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use lwmav_frame::common::{MavFrame, HEARTBEAT_DATA};

    use super::*;
    use crate::action::ActionStatus;
    use crate::test_support::{frame, heartbeat, loopback_vehicle, sent};

    fn ack_data(command: MavCmd, result: MavResult) -> COMMAND_ACK_DATA {
        COMMAND_ACK_DATA {
            command,
            result,
            ..Default::default()
        }
    }

    fn ack(command: MavCmd, result: MavResult) -> Vec<u8> {
        frame(&ack_data(command, result))
    }

    fn takeoff() -> COMMAND_LONG_DATA {
        COMMAND_LONG_DATA {
            command: MavCmd::MAV_CMD_NAV_TAKEOFF,
            param7: 10.0,
            ..Default::default()
        }
    }

    #[test]
    fn confirmation_saturates() {
        assert_eq!(confirmation(1), 0);
        assert_eq!(confirmation(4), 3);
        assert_eq!(confirmation(256), 255);
        assert_eq!(confirmation(10_000), 255);
    }

    #[test]
    fn targets_default_to_vehicle() {
        let (mut vehicle, link) = loopback_vehicle();
        vehicle.set_target(5, 6);
        let mut command = Command::long(&vehicle, takeoff());
        command.execute(&mut vehicle).unwrap();

        let sent = sent::<COMMAND_LONG_DATA>(&link);
        assert_eq!(sent.len(), 1);
        assert_eq!((sent[0].target_system, sent[0].target_component), (5, 6));
        assert_eq!(sent[0].confirmation, 0);
        assert_eq!(sent[0].param7, 10.0);
    }

    #[test]
    fn accepted_ack_finishes() {
        let (mut vehicle, link) = loopback_vehicle();
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_ACCEPTED));
        let mut command = Command::long(&vehicle, takeoff()).with_ack();

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);
        assert_eq!(command.ack().unwrap().result, MavResult::MAV_RESULT_ACCEPTED);
        assert_eq!(command.command_id(), Some(MavCmd::MAV_CMD_NAV_TAKEOFF));
    }

    #[test]
    fn rejected_ack_fails_with_stop() {
        let (mut vehicle, link) = loopback_vehicle();
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_DENIED));
        let mut command = Command::long(&vehicle, takeoff()).with_ack();

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Failed);
        assert_eq!(command.last_continuation(), Some(Continuation::Stop));
        assert_eq!(command.ack().unwrap().result, MavResult::MAV_RESULT_DENIED);
        assert!(matches!(command.take_failure(), Some(Error::Rejected(_))));
    }

    #[test]
    fn unrelated_acks_are_ignored() {
        let (mut vehicle, link) = loopback_vehicle();
        link.inject(ack(MavCmd::MAV_CMD_NAV_LAND, MavResult::MAV_RESULT_DENIED));
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_IN_PROGRESS));
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_ACCEPTED));
        let mut command = Command::long(&vehicle, takeoff()).with_ack();

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);
    }

    #[test]
    fn acks_for_other_stations_are_ignored() {
        let (mut vehicle, link) = loopback_vehicle();
        let foreign = COMMAND_ACK_DATA {
            target_system: 200,
            ..ack_data(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_DENIED)
        };
        link.inject(frame(&foreign));
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_ACCEPTED));
        let mut command = Command::long(&vehicle, takeoff()).with_ack();

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);
    }

    #[test]
    fn restart_increments_confirmation() {
        let (mut vehicle, link) = loopback_vehicle();
        for _ in 0..4 {
            link.inject(frame(&heartbeat()));
        }
        let mut command =
            Command::long(&vehicle, takeoff()).then(&[HEARTBEAT_DATA::ID], |ctx, _| {
                if ctx.attempts() <= 3 {
                    Continuation::Restart
                } else {
                    Continuation::Stop
                }
            });

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);
        let sent = sent::<COMMAND_LONG_DATA>(&link);
        let confirmations: Vec<u8> = sent.iter().map(|cmd| cmd.confirmation).collect();
        assert_eq!(confirmations, vec![0, 1, 2, 3]);
        for cmd in &sent {
            assert_eq!(
                COMMAND_LONG_DATA {
                    confirmation: 0,
                    ..cmd.clone()
                },
                COMMAND_LONG_DATA {
                    confirmation: 0,
                    ..sent[0].clone()
                }
            );
        }
    }

    #[test]
    fn user_layer_sees_other_messages_and_ack_still_resolves() {
        let (mut vehicle, link) = loopback_vehicle();
        link.inject(frame(&heartbeat()));
        link.inject(ack(MavCmd::MAV_CMD_NAV_TAKEOFF, MavResult::MAV_RESULT_ACCEPTED));
        let heartbeats = Rc::new(Cell::new(0));
        let seen = Rc::clone(&heartbeats);
        let mut command = Command::long(&vehicle, takeoff())
            .with_ack()
            .then(&[HEARTBEAT_DATA::ID], move |_, _| {
                seen.set(seen.get() + 1);
                Continuation::Continue
            });

        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);
        assert_eq!(heartbeats.get(), 1);
    }

    #[test]
    fn command_int_sends_frame_and_position() {
        let (mut vehicle, link) = loopback_vehicle();
        let reposition = COMMAND_INT_DATA {
            command: MavCmd::MAV_CMD_DO_REPOSITION,
            frame: MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT,
            x: 473_977_420,
            y: 85_455_940,
            z: 30.0,
            ..Default::default()
        };
        link.inject(ack(MavCmd::MAV_CMD_DO_REPOSITION, MavResult::MAV_RESULT_ACCEPTED));
        let mut command = Command::int(&vehicle, reposition).with_ack();
        assert_eq!(command.execute(&mut vehicle).unwrap(), ActionStatus::Finished);

        let sent = sent::<COMMAND_INT_DATA>(&link);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame, MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT_INT);
        assert_eq!((sent[0].x, sent[0].y), (473_977_420, 85_455_940));
        assert_eq!(sent[0].target_system, 1);
    }
}
