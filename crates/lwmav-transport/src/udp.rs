use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::params::{TransportKind, TransportParams};
use crate::traits::{is_timeout, Transport, POLL_INTERVAL};

/// UDP server transport.
///
/// Binds `0.0.0.0:<port>` and blocks in `open` until the first datagram
/// arrives; its sender becomes the peer. The datagram is only peeked, so
/// its bytes are still delivered by the first `receive`. Later datagrams
/// refresh the peer address, which lets a ground station reconnect from a
/// new source port.
#[derive(Debug, Default)]
pub struct UdpTransport {
    socket: Option<UdpSocket>,
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the current peer, once known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn socket(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or(TransportError::NotOpen)
    }
}

impl Transport for UdpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn open(&mut self, params: &TransportParams) -> Result<()> {
        let TransportParams::Udp { port } = params else {
            return Err(TransportError::WrongKind {
                expected: TransportKind::Udp,
                got: params.kind(),
            });
        };

        let addr = format!("0.0.0.0:{port}");
        let socket = UdpSocket::bind(&addr).map_err(|e| TransportError::Bind {
            addr: addr.clone(),
            source: e,
        })?;

        info!(%addr, "waiting for UDP client");
        let mut first = [0u8; 1];
        let (_, peer) = socket.peek_from(&mut first).map_err(|e| TransportError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
        socket.set_read_timeout(Some(POLL_INTERVAL))?;

        info!(local = %addr, %peer, "UDP link established");
        self.socket = Some(socket);
        self.peer = Some(peer);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let peer = self.peer.ok_or(TransportError::NotOpen)?;
        self.socket()?.send_to(data, peer).map_err(|e| {
            warn!(%peer, error = %e, "UDP send failed");
            TransportError::Io(e)
        })?;
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.socket()?.recv_from(buf) {
            Ok((n, from)) => {
                if self.peer != Some(from) {
                    debug!(%from, "UDP peer address changed");
                    self.peer = Some(from);
                }
                Ok(n)
            }
            Err(err) if is_timeout(&err) => Ok(0),
            Err(err) => {
                warn!(error = %err, "UDP receive failed");
                Err(TransportError::Io(err))
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            debug!("UDP transport closed");
        }
        self.peer = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn learns_peer_from_first_datagram_without_consuming_it() {
        let peer_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = {
            // Reserve a free port, then release it for the transport.
            let tmp = UdpSocket::bind("127.0.0.1:0").unwrap();
            tmp.local_addr().unwrap().port()
        };

        let client = std::thread::spawn(move || {
            for _ in 0..50 {
                peer_socket.send_to(b"hi", ("127.0.0.1", port)).unwrap();
                let mut buf = [0u8; 8];
                peer_socket
                    .set_read_timeout(Some(std::time::Duration::from_millis(20)))
                    .unwrap();
                if let Ok((n, _)) = peer_socket.recv_from(&mut buf) {
                    return buf[..n].to_vec();
                }
            }
            Vec::new()
        });

        let mut transport = UdpTransport::new();
        transport.open(&TransportParams::Udp { port }).unwrap();
        assert!(transport.peer().is_some());

        let mut buf = [0u8; 8];
        let n = transport.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");

        transport.send(b"ok").unwrap();
        assert_eq!(client.join().unwrap(), b"ok");
        transport.close();
    }

    #[test]
    fn send_before_open_fails() {
        let mut transport = UdpTransport::new();
        assert!(matches!(transport.send(b"x"), Err(TransportError::NotOpen)));
    }
}
