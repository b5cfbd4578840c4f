//! Byte-channel transports for the lwmav link engine.
//!
//! Every backend implements the small [`Transport`] contract: open with
//! [`TransportParams`], send a byte slice, receive into a buffer, close.
//! The connection layer above never looks past that contract, so backends
//! can be swapped or registered at runtime through a [`TransportRegistry`].
//!
//! Provided backends:
//! - UDP server (learns its peer from the first datagram)
//! - UDP client
//! - TCP client
//! - POSIX serial port (unix only)
//! - In-process loopback, for tests and demos

pub mod error;
pub mod loopback;
pub mod params;
pub mod registry;
pub mod tcp;
pub mod traits;
pub mod udp;
pub mod udp_client;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use loopback::{LoopbackLink, LoopbackTransport};
pub use params::{Baudrate, TransportKind, TransportParams};
pub use registry::{TransportFactory, TransportRegistry};
pub use tcp::TcpTransport;
pub use traits::{Transport, POLL_INTERVAL};
pub use udp::UdpTransport;
pub use udp_client::UdpClientTransport;

#[cfg(unix)]
pub use serial::SerialTransport;
