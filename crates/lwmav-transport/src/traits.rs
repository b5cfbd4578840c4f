use std::time::Duration;

use crate::error::Result;
use crate::params::{TransportKind, TransportParams};

/// Read timeout applied by the socket and serial backends.
///
/// A receive that sees no data within this window returns `Ok(0)`, so the
/// poll loop regains control and can check action deadlines.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A duplex byte channel to the remote vehicle.
///
/// Implementations own their OS resources; `close` releases them and must
/// tolerate being called more than once.
pub trait Transport {
    /// The kind this backend serves.
    fn kind(&self) -> TransportKind;

    /// Establish the channel.
    fn open(&mut self, params: &TransportParams) -> Result<()>;

    /// Write all of `data`.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read at most `buf.len()` bytes. `Ok(0)` means nothing arrived yet.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the channel.
    fn close(&mut self);
}

pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
