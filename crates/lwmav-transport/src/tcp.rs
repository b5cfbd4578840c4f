use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::params::{TransportKind, TransportParams};
use crate::traits::{is_timeout, Transport, POLL_INTERVAL};
use crate::udp_client::resolve;

/// TCP client transport (e.g. a SITL instance on port 5760).
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn open(&mut self, params: &TransportParams) -> Result<()> {
        let TransportParams::Tcp { host, port } = params else {
            return Err(TransportError::WrongKind {
                expected: TransportKind::Tcp,
                got: params.kind(),
            });
        };

        let addr = resolve(host, *port)?;
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            source: e,
        })?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(POLL_INTERVAL))?;

        debug!(%addr, "TCP transport connected");
        self.stream = Some(stream);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        loop {
            match stream.write_all(data) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "TCP send failed");
                    return Err(TransportError::Io(err));
                }
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream()?;
        match stream.read(buf) {
            Ok(0) => Err(TransportError::Closed),
            Ok(n) => Ok(n),
            Err(err) if is_timeout(&err) || err.kind() == ErrorKind::Interrupted => Ok(0),
            Err(err) => {
                warn!(error = %err, "TCP receive failed");
                Err(TransportError::Io(err))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("TCP transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn roundtrip_and_peer_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).unwrap();
            conn.write_all(&buf).unwrap();
        });

        let mut transport = TcpTransport::new();
        transport
            .open(&TransportParams::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            })
            .unwrap();
        transport.send(b"mav!").unwrap();

        let mut buf = [0u8; 8];
        let mut received = Vec::new();
        while received.len() < 4 {
            let n = transport.receive(&mut buf).unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        assert_eq!(received, b"mav!");

        server.join().unwrap();
        let closed = loop {
            match transport.receive(&mut buf) {
                Ok(0) => continue,
                other => break other,
            }
        };
        assert!(matches!(closed, Err(TransportError::Closed)));
    }

    #[test]
    fn connect_refused_is_reported() {
        let port = {
            let tmp = TcpListener::bind("127.0.0.1:0").unwrap();
            tmp.local_addr().unwrap().port()
        };
        let mut transport = TcpTransport::new();
        let err = transport
            .open(&TransportParams::Tcp {
                host: "127.0.0.1".to_string(),
                port,
            })
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
