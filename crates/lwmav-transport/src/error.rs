use crate::params::TransportKind;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind a local socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to reach the remote endpoint.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// Failed to open or configure a device.
    #[error("failed to open device {device}: {source}")]
    Device {
        device: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on an open transport.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The parameters do not describe this transport.
    #[error("parameters for {got} passed to {expected} transport")]
    WrongKind {
        expected: TransportKind,
        got: TransportKind,
    },

    /// The parameters are malformed.
    #[error("invalid transport parameters: {0}")]
    InvalidParams(String),

    /// Operation attempted before `open` or after `close`.
    #[error("transport is not open")]
    NotOpen,

    /// The remote end closed the stream.
    #[error("transport closed by peer")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;
