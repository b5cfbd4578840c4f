use lwmav_frame::FrameError;
use lwmav_transport::{TransportError, TransportKind};

use crate::connection::ConnStatus;

/// Errors produced by the connection, registry and action layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frame or payload could not be encoded or interpreted.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// The connection is not in the state the operation requires.
    #[error("connection is {0}, expected open")]
    BadConnection(ConnStatus),

    /// A caller-supplied parameter is invalid.
    #[error("invalid parameter: {0}")]
    BadParam(String),

    /// Local I/O failure (configuration files and the like).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No complete frame is available yet. Transient, not a fault.
    #[error("no data available")]
    NoData,

    /// The handler pool or registry table is full.
    #[error("out of handler slots")]
    NoMem,

    /// No transport backend is registered for this kind.
    #[error("transport kind {0} is not supported")]
    NotSupported(TransportKind),

    #[error("deadline exceeded")]
    Timeout,

    /// The action already reached a terminal state.
    #[error("action already stopped")]
    Stopped,

    /// The vehicle answered with a negative acknowledgment.
    #[error("rejected by vehicle: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Copyable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadMessage,
    BadConnection,
    BadParam,
    Io,
    NoData,
    NoMem,
    NotSupported,
    Timeout,
    Stopped,
    Rejected,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BadMessage(_) | Self::Frame(_) => ErrorKind::BadMessage,
            Self::BadConnection(_) => ErrorKind::BadConnection,
            Self::BadParam(_) | Self::Config(_) => ErrorKind::BadParam,
            Self::Io(_) => ErrorKind::Io,
            Self::NoData => ErrorKind::NoData,
            Self::NoMem => ErrorKind::NoMem,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Timeout => ErrorKind::Timeout,
            Self::Stopped => ErrorKind::Stopped,
            Self::Rejected(_) => ErrorKind::Rejected,
            Self::Transport(err) => match err {
                TransportError::WrongKind { .. } | TransportError::InvalidParams(_) => {
                    ErrorKind::BadParam
                }
                _ => ErrorKind::Io,
            },
        }
    }

    /// True for errors the poll loop absorbs as an idle tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
