//! Lightweight MAVLink client engine.
//!
//! lwmav talks to a single remote vehicle over UDP, TCP or a serial line:
//! it frames and validates MAVLink v1/v2 messages, routes them to handlers by
//! message id, and turns outbound commands into retryable, timeout-bounded
//! exchanges.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte-channel backends (UDP, TCP, serial, loopback)
//! - [`frame`]: MAVLink framing and checksums; payload types come from the
//!   re-exported `mavlink` crate
//! - [`vehicle`]: connection, dispatch registry, actions and commands
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use lwmav::frame::common::GLOBAL_POSITION_INT_DATA;
//! use lwmav::frame::MessageData;
//! use lwmav::transport::TransportParams;
//! use lwmav::{Continuation, Vehicle};
//!
//! let mut vehicle = Vehicle::new();
//! vehicle.open(&TransportParams::Udp { port: 14550 })?;
//! let home = vehicle.get_home_position()?;
//! println!("home at {}, {} (degE7)", home.latitude, home.longitude);
//!
//! let _position = vehicle.request_message_periodic(
//!     GLOBAL_POSITION_INT_DATA::ID,
//!     Duration::from_secs(1),
//!     |_, msg| {
//!         println!("position update from {}", msg.sysid());
//!         Continuation::Continue
//!     },
//! )?;
//! let err = vehicle.spin();
//! eprintln!("link ended: {err}");
//! # Ok::<(), lwmav::Error>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use lwmav_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use lwmav_frame::*;
}

/// Re-export vehicle, action and command types.
pub mod vehicle {
    pub use lwmav_vehicle::*;
}

pub use lwmav_vehicle::{
    Action, ActionContext, ActionStatus, Command, Continuation, CopterMode, Error, ErrorKind,
    Event, Result, Vehicle, VehicleConfig,
};
