//! Vehicle-side engine: connection, dispatch registry and the
//! action/command state machine.
//!
//! A [`Vehicle`] owns one [`Connection`], a fixed-capacity [`HandlerPool`]
//! and a [`Registry`] mapping message ids to handler lists. Each
//! [`Vehicle::spin_once`] receives at most one message and dispatches it.
//! [`Action`] and [`Command`] layer request/response exchanges on top, with
//! continuation, retry and timeout semantics.
//!
//! Everything here is single-threaded; the types are `!Send` by
//! construction.

pub mod action;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod list;
pub mod mission;
pub mod pool;
pub mod registry;
pub mod requests;
pub mod vehicle;

#[cfg(test)]
mod test_support;

pub use action::{Action, ActionContext, ActionStatus, Continuation, Event};
pub use command::{confirmation, Command};
pub use config::VehicleConfig;
pub use connection::{ConnStatus, Connection, ConnectionStats};
pub use error::{Error, ErrorKind, Result};
pub use mission::{default_finalize, waypoint, MAX_MISSION_ITEMS};
pub use pool::{FnHandler, HandleRef, HandlerPool, MessageHandler, POOL_CAPACITY};
pub use registry::{Registry, REGISTRY_CAPACITY};
pub use requests::{CopterMode, ARM_FORCE_MAGIC, HOME_POSITION_TIMEOUT};
pub use vehicle::Vehicle;
