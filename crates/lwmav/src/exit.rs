use std::fmt;
use std::io;

use lwmav_transport::TransportError;
use lwmav_vehicle::{Error, ErrorKind};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
/// The vehicle answered with a negative acknowledgement.
pub const REJECTED: i32 = 10;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::NotFound => USAGE,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Device { source, .. }
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidParams(_) | TransportError::WrongKind { .. } => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn vehicle_error(context: &str, err: Error) -> CliError {
    match err {
        Error::Transport(err) => transport_error(context, err),
        Error::Io(err) => io_error(context, err),
        Error::Config(err) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        other => {
            let code = match other.kind() {
                ErrorKind::Timeout => TIMEOUT,
                ErrorKind::Rejected => REJECTED,
                ErrorKind::BadParam | ErrorKind::NotSupported => USAGE,
                ErrorKind::BadMessage => DATA_INVALID,
                ErrorKind::BadConnection | ErrorKind::Io => TRANSPORT_ERROR,
                ErrorKind::Stopped => FAILURE,
                ErrorKind::NoData | ErrorKind::NoMem => INTERNAL,
            };
            CliError::new(code, format!("{context}: {other}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_124() {
        assert_eq!(vehicle_error("home", Error::Timeout).code, TIMEOUT);
    }

    #[test]
    fn rejection_has_its_own_code() {
        let err = vehicle_error("arm", Error::Rejected("denied".into()));
        assert_eq!(err.code, REJECTED);
        assert_eq!(err.to_string(), "arm: rejected by vehicle: denied");
    }

    #[test]
    fn transport_io_is_unwrapped() {
        let err = Error::Transport(TransportError::Connect {
            addr: "127.0.0.1:5760".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        });
        assert_eq!(vehicle_error("open", err).code, FAILURE);
    }

    #[test]
    fn missing_config_is_usage() {
        let err = Error::Io(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(vehicle_error("config", err).code, USAGE);
    }
}
