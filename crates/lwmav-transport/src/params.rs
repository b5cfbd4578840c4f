use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::loopback::LoopbackLink;

/// Transport families known to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Udp,
    UdpClient,
    Tcp,
    Serial,
    Loopback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Udp => "udp",
            TransportKind::UdpClient => "udp-client",
            TransportKind::Tcp => "tcp",
            TransportKind::Serial => "serial",
            TransportKind::Loopback => "loopback",
        };
        f.write_str(name)
    }
}

/// Serial line rates supported by the serial backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Baudrate {
    B9600,
    B19200,
    B38400,
    B57600,
    B115200,
    B230400,
    B460800,
    B921600,
}

impl Baudrate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            Baudrate::B9600 => 9_600,
            Baudrate::B19200 => 19_200,
            Baudrate::B38400 => 38_400,
            Baudrate::B57600 => 57_600,
            Baudrate::B115200 => 115_200,
            Baudrate::B230400 => 230_400,
            Baudrate::B460800 => 460_800,
            Baudrate::B921600 => 921_600,
        }
    }
}

impl TryFrom<u32> for Baudrate {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            9_600 => Ok(Baudrate::B9600),
            19_200 => Ok(Baudrate::B19200),
            38_400 => Ok(Baudrate::B38400),
            57_600 => Ok(Baudrate::B57600),
            115_200 => Ok(Baudrate::B115200),
            230_400 => Ok(Baudrate::B230400),
            460_800 => Ok(Baudrate::B460800),
            921_600 => Ok(Baudrate::B921600),
            other => Err(format!("unsupported baud rate: {other}")),
        }
    }
}

impl From<Baudrate> for u32 {
    fn from(value: Baudrate) -> Self {
        value.bits_per_second()
    }
}

/// Parameters handed to [`Transport::open`](crate::Transport::open).
///
/// The variant selects the backend; see [`TransportParams::kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportParams {
    /// Listen on a local UDP port and talk to whoever sends first.
    Udp { port: u16 },
    /// Send to a fixed UDP endpoint.
    UdpClient { host: String, port: u16 },
    /// Connect to a TCP endpoint.
    Tcp { host: String, port: u16 },
    /// Raw 8N1 serial device.
    Serial { device: PathBuf, baudrate: Baudrate },
    /// In-process link shared with a test or demo driver.
    #[serde(skip)]
    Loopback(LoopbackLink),
}

impl TransportParams {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportParams::Udp { .. } => TransportKind::Udp,
            TransportParams::UdpClient { .. } => TransportKind::UdpClient,
            TransportParams::Tcp { .. } => TransportKind::Tcp,
            TransportParams::Serial { .. } => TransportKind::Serial,
            TransportParams::Loopback(_) => TransportKind::Loopback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let params = TransportParams::UdpClient {
            host: "127.0.0.1".to_string(),
            port: 14550,
        };
        assert_eq!(params.kind(), TransportKind::UdpClient);
        assert_eq!(
            TransportParams::Loopback(LoopbackLink::new()).kind(),
            TransportKind::Loopback
        );
    }

    #[test]
    fn params_deserialize_from_json() {
        let params: TransportParams =
            serde_json::from_str(r#"{"type":"serial","device":"/dev/ttyACM0","baudrate":57600}"#)
                .unwrap();
        match params {
            TransportParams::Serial { device, baudrate } => {
                assert_eq!(device, PathBuf::from("/dev/ttyACM0"));
                assert_eq!(baudrate, Baudrate::B57600);
            }
            other => panic!("unexpected params: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_baudrate() {
        assert!(Baudrate::try_from(12_345).is_err());
        let err = serde_json::from_str::<TransportParams>(
            r#"{"type":"serial","device":"/dev/ttyS0","baudrate":1200}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn kind_display_names() {
        assert_eq!(TransportKind::UdpClient.to_string(), "udp-client");
        assert_eq!(TransportKind::Serial.to_string(), "serial");
    }
}
