//! Request/response state machine built from handler subscriptions.
//!
//! An [`Action`] subscribes one handler per message id it cares about,
//! invokes its `run` callback (typically sending a request), and then reacts
//! to incoming messages:
//!
//! ```text
//!  Init ──submit──▶ Executing ──then: Stop──────────▶ Finished
//!                     │  ▲                             (Failed if marked)
//!                     │  └─then: Continue / Restart
//!                     ├──except message / run error──▶ Failed
//!                     └──deadline passed (poll_once)─▶ Failed
//! ```
//!
//! Every handler is released together on the transition to a terminal
//! state, and no callback runs after it.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use lwmav_frame::{Message, MessageData};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pool::{HandleRef, MessageHandler};
use crate::vehicle::Vehicle;

/// What a `then` callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Continuation {
    /// Keep waiting for more messages.
    Continue,
    /// Release all handlers and finish.
    Stop,
    /// Invoke `run` again, keeping the subscriptions.
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Init,
    Executing,
    Finished,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why `except` was invoked.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// A message from the except list arrived.
    Message(&'a Message),
    /// Registration, `run`, or the link failed.
    Fail(&'a Error),
}

pub type RunFn = Box<dyn FnMut(&mut ActionContext<'_>) -> Result<()>>;
pub type ThenFn = Box<dyn FnMut(&mut ActionContext<'_>, &Message) -> Continuation>;
pub type ExceptFn = Box<dyn FnMut(&mut ActionContext<'_>, Event<'_>)>;
pub type TimeoutFn = Box<dyn FnMut(&mut ActionContext<'_>)>;

#[derive(Debug)]
struct Progress {
    status: ActionStatus,
    attempts: u32,
    failed: bool,
    failure: Option<Error>,
    result: Option<Message>,
    last_continuation: Option<Continuation>,
}

/// What callbacks get to work with: the vehicle, plus the action's own
/// result and failure slots.
pub struct ActionContext<'a> {
    vehicle: &'a mut Vehicle,
    progress: &'a mut Progress,
}

impl ActionContext<'_> {
    pub fn vehicle(&mut self) -> &mut Vehicle {
        self.vehicle
    }

    pub fn send(&mut self, msg: &mut Message) -> Result<()> {
        self.vehicle.send(msg)
    }

    pub fn send_payload<T: MessageData>(&mut self, payload: &T) -> Result<()> {
        self.vehicle.send_payload(payload)
    }

    /// Number of times `run` has been invoked, the current call included.
    pub fn attempts(&self) -> u32 {
        self.progress.attempts
    }

    pub fn set_result(&mut self, msg: Message) {
        self.progress.result = Some(msg);
    }

    pub fn result(&self) -> Option<&Message> {
        self.progress.result.as_ref()
    }

    /// Mark the action failed. A later `Stop` ends it as
    /// [`ActionStatus::Failed`] instead of `Finished`.
    pub fn fail(&mut self, reason: Error) {
        debug!(reason = %reason, "action marked failed");
        self.progress.failed = true;
        self.progress.failure = Some(reason);
    }

    pub fn is_failed(&self) -> bool {
        self.progress.failed
    }
}

struct ActionState {
    progress: Progress,
    run: Option<RunFn>,
    then: Option<ThenFn>,
    then_ids: Vec<u32>,
    except: Option<ExceptFn>,
    except_ids: Vec<u32>,
    timeout: Option<TimeoutFn>,
    deadline: Option<Instant>,
    handles: Vec<HandleRef>,
}

impl ActionState {
    fn subscription_ids(&self) -> Vec<u32> {
        let mut ids = Vec::with_capacity(self.then_ids.len() + self.except_ids.len());
        for &id in self.then_ids.iter().chain(&self.except_ids) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    fn invoke_run(&mut self, vehicle: &mut Vehicle) -> Result<()> {
        self.progress.attempts += 1;
        let Some(run) = self.run.as_mut() else {
            return Ok(());
        };
        run(&mut ActionContext {
            vehicle,
            progress: &mut self.progress,
        })
    }

    fn invoke_except(&mut self, vehicle: &mut Vehicle, event: Event<'_>) {
        if let Some(except) = self.except.as_mut() {
            except(
                &mut ActionContext {
                    vehicle,
                    progress: &mut self.progress,
                },
                event,
            );
        }
    }

    fn release(&mut self, vehicle: &mut Vehicle) {
        for handle in self.handles.drain(..) {
            vehicle.destroy_handler(handle);
        }
    }

    fn terminate(&mut self, vehicle: &mut Vehicle, status: ActionStatus) {
        self.release(vehicle);
        self.deadline = None;
        self.progress.status = status;
        debug!(status = %status, attempts = self.progress.attempts, "action terminated");
    }

    fn fail(&mut self, vehicle: &mut Vehicle, err: &Error) {
        self.invoke_except(vehicle, Event::Fail(err));
        self.terminate(vehicle, ActionStatus::Failed);
    }

    fn expire(&mut self, vehicle: &mut Vehicle) {
        warn!(attempts = self.progress.attempts, "action timed out");
        if let Some(timeout) = self.timeout.as_mut() {
            timeout(&mut ActionContext {
                vehicle: &mut *vehicle,
                progress: &mut self.progress,
            });
        }
        self.terminate(vehicle, ActionStatus::Failed);
    }

    fn deliver(&mut self, vehicle: &mut Vehicle, msg: &Message) {
        if self.progress.status != ActionStatus::Executing {
            return;
        }
        let msgid = msg.msgid();

        if self.then_ids.contains(&msgid) {
            let continuation = match self.then.as_mut() {
                Some(then) => then(
                    &mut ActionContext {
                        vehicle: &mut *vehicle,
                        progress: &mut self.progress,
                    },
                    msg,
                ),
                None => Continuation::Stop,
            };
            self.progress.last_continuation = Some(continuation);

            match continuation {
                Continuation::Continue => {}
                Continuation::Stop => {
                    let status = if self.progress.failed {
                        ActionStatus::Failed
                    } else {
                        ActionStatus::Finished
                    };
                    self.terminate(vehicle, status);
                }
                Continuation::Restart => {
                    debug!(msgid, attempt = self.progress.attempts + 1, "action restart");
                    if let Err(err) = self.invoke_run(vehicle) {
                        warn!(error = %err, "action rerun failed");
                        self.fail(vehicle, &err);
                        self.progress.failure = Some(err);
                    }
                }
            }
        } else if self.except_ids.contains(&msgid) {
            self.invoke_except(vehicle, Event::Message(msg));
            self.terminate(vehicle, ActionStatus::Failed);
        }
    }
}

struct ActionHandler {
    state: Rc<RefCell<ActionState>>,
}

impl MessageHandler for ActionHandler {
    fn handle(&self, vehicle: &mut Vehicle, msg: &Message) {
        match self.state.try_borrow_mut() {
            Ok(mut state) => state.deliver(vehicle, msg),
            Err(_) => warn!(msgid = msg.msgid(), "action re-entered during dispatch, skipping"),
        }
    }
}

/// An asynchronous, retryable, timeout-bounded request/response exchange.
///
/// Built with [`Action::new`] and the `then` / `except` / `on_timeout`
/// builders, then driven by [`submit`](Action::submit) and
/// [`poll`](Action::poll) (or one of the `execute` shorthands).
///
/// Handlers keep the action's state alive, so an action submitted with
/// [`execute_async`](Action::execute_async) keeps reacting to messages on
/// later spins even after the `Action` value is dropped.
pub struct Action {
    state: Rc<RefCell<ActionState>>,
}

impl Action {
    pub fn new<F>(run: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>) -> Result<()> + 'static,
    {
        Self {
            state: Rc::new(RefCell::new(ActionState {
                progress: Progress {
                    status: ActionStatus::Init,
                    attempts: 0,
                    failed: false,
                    failure: None,
                    result: None,
                    last_continuation: None,
                },
                run: Some(Box::new(run)),
                then: None,
                then_ids: Vec::new(),
                except: None,
                except_ids: Vec::new(),
                timeout: None,
                deadline: None,
                handles: Vec::new(),
            })),
        }
    }

    /// Handle `ids` with `then`.
    ///
    /// Callbacks layer: a later `then` takes precedence for its own ids and
    /// hands every other subscribed id down to the earlier callback.
    pub fn then<F>(self, ids: &[u32], mut then: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>, &Message) -> Continuation + 'static,
    {
        {
            let mut state = self.state.borrow_mut();
            add_ids(&mut state.then_ids, ids);
            let layer_ids = ids.to_vec();
            let layered: ThenFn = match state.then.take() {
                None => Box::new(then),
                Some(mut below) => Box::new(move |ctx: &mut ActionContext<'_>, msg: &Message| {
                    if layer_ids.contains(&msg.msgid()) {
                        then(ctx, msg)
                    } else {
                        below(ctx, msg)
                    }
                }),
            };
            state.then = Some(layered);
        }
        self
    }

    /// Add `ids` to the then-list, routed to the existing `then` callback.
    pub fn upon(self, ids: &[u32]) -> Self {
        add_ids(&mut self.state.borrow_mut().then_ids, ids);
        self
    }

    /// Treat `ids` as failure. Replaces any previous `except` callback.
    pub fn except<F>(self, ids: &[u32], except: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>, Event<'_>) + 'static,
    {
        {
            let mut state = self.state.borrow_mut();
            add_ids(&mut state.except_ids, ids);
            state.except = Some(Box::new(except));
        }
        self
    }

    pub fn on_timeout<F>(self, timeout: F) -> Self
    where
        F: FnMut(&mut ActionContext<'_>) + 'static,
    {
        self.state.borrow_mut().timeout = Some(Box::new(timeout));
        self
    }

    fn state(&self) -> Ref<'_, ActionState> {
        self.state.borrow()
    }

    fn state_mut(&self) -> Result<RefMut<'_, ActionState>> {
        self.state
            .try_borrow_mut()
            .map_err(|_| Error::BadParam("action is busy in a callback".into()))
    }

    /// Register handlers, arm the deadline and invoke `run`.
    ///
    /// A zero `timeout` means no deadline. If a handler cannot be
    /// registered, everything registered so far is released, `except`
    /// sees the failure and the action ends as Failed.
    pub fn submit(&mut self, vehicle: &mut Vehicle, timeout: Duration) -> Result<()> {
        let mut state = self.state_mut()?;
        match state.progress.status {
            ActionStatus::Init => {}
            ActionStatus::Executing => {
                return Err(Error::BadParam("action already submitted".into()));
            }
            ActionStatus::Finished | ActionStatus::Failed => return Err(Error::Stopped),
        }

        for msgid in state.subscription_ids() {
            let handler: Rc<dyn MessageHandler> = Rc::new(ActionHandler {
                state: Rc::clone(&self.state),
            });
            match vehicle.register_handler(msgid, handler) {
                Ok(handle) => state.handles.push(handle),
                Err(err) => {
                    warn!(msgid, error = %err, "action registration failed");
                    state.fail(vehicle, &err);
                    return Err(err);
                }
            }
        }

        state.progress.status = ActionStatus::Executing;
        state.deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        debug!(
            subscriptions = state.handles.len(),
            timeout_ms = timeout.as_millis() as u64,
            "action submitted"
        );

        if let Err(err) = state.invoke_run(vehicle) {
            warn!(error = %err, "action run failed");
            state.fail(vehicle, &err);
            return Err(err);
        }
        Ok(())
    }

    /// One step: check the deadline, then spin the vehicle once.
    ///
    /// Returns [`Error::Stopped`] once the action is terminal and
    /// [`Error::Timeout`] when the deadline has passed. A link failure
    /// fails the action and is returned.
    pub fn poll_once(&mut self, vehicle: &mut Vehicle) -> Result<()> {
        {
            let mut state = self.state_mut()?;
            match state.progress.status {
                ActionStatus::Init => {
                    return Err(Error::BadParam("action has not been submitted".into()));
                }
                ActionStatus::Finished | ActionStatus::Failed => return Err(Error::Stopped),
                ActionStatus::Executing => {}
            }
            if state.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                state.expire(vehicle);
                return Err(Error::Timeout);
            }
        }

        if let Err(err) = vehicle.spin_once() {
            let mut state = self.state_mut()?;
            if state.progress.status == ActionStatus::Executing {
                warn!(error = %err, "link failed while action executing");
                state.fail(vehicle, &err);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drive the action to a terminal state.
    ///
    /// An action with an empty then-list expects no reply and finishes
    /// immediately. Otherwise this polls until the action stops, returning
    /// its terminal status; timeouts and link failures are errors.
    pub fn poll(&mut self, vehicle: &mut Vehicle) -> Result<ActionStatus> {
        {
            let mut state = self.state_mut()?;
            if state.progress.status == ActionStatus::Init {
                return Err(Error::BadParam("action has not been submitted".into()));
            }
            if state.then_ids.is_empty() {
                if state.progress.status == ActionStatus::Executing {
                    state.terminate(vehicle, ActionStatus::Finished);
                }
                return Ok(state.progress.status);
            }
        }

        loop {
            match self.poll_once(vehicle) {
                Ok(()) => {}
                Err(Error::Stopped) => return Ok(self.status()),
                Err(err) => return Err(err),
            }
        }
    }

    pub fn execute(&mut self, vehicle: &mut Vehicle) -> Result<ActionStatus> {
        self.submit(vehicle, Duration::ZERO)?;
        self.poll(vehicle)
    }

    pub fn execute_timeout(
        &mut self,
        vehicle: &mut Vehicle,
        timeout: Duration,
    ) -> Result<ActionStatus> {
        self.submit(vehicle, timeout)?;
        self.poll(vehicle)
    }

    /// Submit without polling; later spins of `vehicle` drive progress.
    pub fn execute_async(&mut self, vehicle: &mut Vehicle) -> Result<()> {
        self.submit(vehicle, Duration::ZERO)
    }

    /// Release every handler and mark the action Failed without invoking
    /// any callback. Returns false if the action was not executing.
    pub fn cancel(&mut self, vehicle: &mut Vehicle) -> bool {
        let Ok(mut state) = self.state_mut() else {
            return false;
        };
        if state.progress.status != ActionStatus::Executing {
            return false;
        }
        state.terminate(vehicle, ActionStatus::Failed);
        state.progress.failure = Some(Error::Stopped);
        true
    }

    pub fn status(&self) -> ActionStatus {
        self.state().progress.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Number of times `run` has been invoked.
    pub fn attempts(&self) -> u32 {
        self.state().progress.attempts
    }

    pub fn result(&self) -> Option<Message> {
        self.state().progress.result.clone()
    }

    /// The continuation returned by the most recent `then` call.
    pub fn last_continuation(&self) -> Option<Continuation> {
        self.state().progress.last_continuation
    }

    /// Take the reason recorded by [`ActionContext::fail`] or by a failed
    /// rerun.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.state.borrow_mut().progress.failure.take()
    }

    /// Handlers currently registered for this action.
    pub fn handles(&self) -> Vec<HandleRef> {
        self.state().handles.clone()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state().deadline
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state.try_borrow() {
            Ok(state) => f
                .debug_struct("Action")
                .field("status", &state.progress.status)
                .field("attempts", &state.progress.attempts)
                .field("then_ids", &state.then_ids)
                .field("except_ids", &state.except_ids)
                .finish(),
            Err(_) => f.write_str("Action { <busy> }"),
        }
    }
}

fn add_ids(list: &mut Vec<u32>, ids: &[u32]) {
    for &id in ids {
        if !list.contains(&id) {
            list.push(id);
        }
    }
}
