use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::params::{TransportKind, TransportParams};
use crate::traits::{is_timeout, Transport, POLL_INTERVAL};

/// UDP client transport: sends to a fixed endpoint, accepts datagrams from
/// any source on its ephemeral port.
#[derive(Debug, Default)]
pub struct UdpClientTransport {
    socket: Option<UdpSocket>,
    remote: Option<SocketAddr>,
}

impl UdpClientTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Local address of the bound socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }
}

pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect {
            addr: format!("{host}:{port}"),
            source: e,
        })?
        .next()
        .ok_or_else(|| TransportError::InvalidParams(format!("{host}:{port} did not resolve")))
}

impl Transport for UdpClientTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UdpClient
    }

    fn open(&mut self, params: &TransportParams) -> Result<()> {
        let TransportParams::UdpClient { host, port } = params else {
            return Err(TransportError::WrongKind {
                expected: TransportKind::UdpClient,
                got: params.kind(),
            });
        };

        let remote = resolve(host, *port)?;
        let bind_addr = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr).map_err(|e| TransportError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        debug!(%remote, "UDP client transport open");
        self.socket = Some(socket);
        self.remote = Some(remote);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let (Some(socket), Some(remote)) = (&self.socket, self.remote) else {
            return Err(TransportError::NotOpen);
        };
        socket.send_to(data, remote).map_err(|e| {
            warn!(%remote, error = %e, "UDP client send failed");
            TransportError::Io(e)
        })?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let socket = self.socket.as_ref().ok_or(TransportError::NotOpen)?;
        match socket.recv_from(buf) {
            Ok((n, _)) => Ok(n),
            Err(err) if is_timeout(&err) => Ok(0),
            Err(err) => {
                warn!(error = %err, "UDP client receive failed");
                Err(TransportError::Io(err))
            }
        }
    }

    fn close(&mut self) {
        self.socket = None;
        self.remote = None;
    }
}
