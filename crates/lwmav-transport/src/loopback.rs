//! In-process loopback transport.
//!
//! The [`LoopbackLink`] is the "far end" of the channel: a test or demo
//! injects byte chunks that the transport hands out one chunk per
//! `receive` call, and inspects everything the engine sent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::params::{TransportKind, TransportParams};
use crate::traits::Transport;

#[derive(Default)]
struct LinkState {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
    open: bool,
    receive_calls: usize,
    fail_receive: bool,
}

/// Shared handle to both directions of a loopback channel.
#[derive(Clone, Default)]
pub struct LoopbackLink {
    state: Rc<RefCell<LinkState>>,
}

impl LoopbackLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one chunk for delivery by a single `receive` call.
    pub fn inject(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.state.borrow_mut().inbound.push_back(bytes);
        }
    }

    /// Queue `bytes` split into chunks of at most `chunk` bytes.
    pub fn inject_chunked(&self, bytes: &[u8], chunk: usize) {
        for piece in bytes.chunks(chunk.max(1)) {
            self.inject(piece.to_vec());
        }
    }

    /// Drain every buffer passed to `send` so far.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.borrow_mut().outbound)
    }

    /// Number of sends not yet drained.
    pub fn sent_len(&self) -> usize {
        self.state.borrow().outbound.len()
    }

    /// Feed everything sent so far back into the receive side.
    pub fn reflect(&self) {
        let mut state = self.state.borrow_mut();
        let sent = std::mem::take(&mut state.outbound);
        state.inbound.extend(sent);
    }

    /// Chunks waiting to be received.
    pub fn pending_chunks(&self) -> usize {
        self.state.borrow().inbound.len()
    }

    /// How many times the transport's `receive` ran.
    pub fn receive_calls(&self) -> usize {
        self.state.borrow().receive_calls
    }

    /// Make every subsequent `receive` fail with an I/O error.
    pub fn fail_receives(&self, fail: bool) {
        self.state.borrow_mut().fail_receive = fail;
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().open
    }
}

impl fmt::Debug for LoopbackLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LoopbackLink")
            .field("open", &state.open)
            .field("inbound_chunks", &state.inbound.len())
            .field("outbound_chunks", &state.outbound.len())
            .finish()
    }
}

/// Transport end of a [`LoopbackLink`].
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    link: Option<LoopbackLink>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn link(&self) -> Result<&LoopbackLink> {
        self.link.as_ref().ok_or(TransportError::NotOpen)
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Loopback
    }

    fn open(&mut self, params: &TransportParams) -> Result<()> {
        let TransportParams::Loopback(link) = params else {
            return Err(TransportError::WrongKind {
                expected: TransportKind::Loopback,
                got: params.kind(),
            });
        };
        link.state.borrow_mut().open = true;
        self.link = Some(link.clone());
        debug!("loopback transport open");
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<()> {
        let link = self.link()?;
        link.state.borrow_mut().outbound.push(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize> {
        let link = self.link()?;
        let mut state = link.state.borrow_mut();
        state.receive_calls += 1;
        if state.fail_receive {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "loopback receive failure",
            )));
        }
        let Some(mut chunk) = state.inbound.pop_front() else {
            return Ok(0);
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            state.inbound.push_front(rest);
        }
        Ok(n)
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.state.borrow_mut().open = false;
            debug!("loopback transport closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_pair() -> (LoopbackTransport, LoopbackLink) {
        let link = LoopbackLink::new();
        let mut transport = LoopbackTransport::new();
        transport
            .open(&TransportParams::Loopback(link.clone()))
            .unwrap();
        (transport, link)
    }

    #[test]
    fn delivers_one_chunk_per_receive() {
        let (mut transport, link) = open_pair();
        link.inject(b"abc".to_vec());
        link.inject(b"de".to_vec());

        let mut buf = [0u8; 16];
        assert_eq!(transport.receive(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(transport.receive(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"de");
        assert_eq!(transport.receive(&mut buf).unwrap(), 0);
        assert_eq!(link.receive_calls(), 3);
    }

    #[test]
    fn oversized_chunk_is_split_across_receives() {
        let (mut transport, link) = open_pair();
        link.inject(b"0123456789".to_vec());

        let mut buf = [0u8; 4];
        assert_eq!(transport.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(link.pending_chunks(), 1);
    }

    #[test]
    fn reflect_moves_sent_bytes_to_inbound() {
        let (mut transport, link) = open_pair();
        transport.send(b"ping").unwrap();
        assert_eq!(link.sent_len(), 1);

        link.reflect();
        let mut buf = [0u8; 8];
        assert_eq!(transport.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert_eq!(link.sent_len(), 0);
    }

    #[test]
    fn rejects_foreign_params_and_use_before_open() {
        let mut transport = LoopbackTransport::new();
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf),
            Err(TransportError::NotOpen)
        ));

        let err = transport
            .open(&TransportParams::Udp { port: 14550 })
            .unwrap_err();
        assert!(matches!(err, TransportError::WrongKind { .. }));
    }

    #[test]
    fn close_marks_link_closed_and_is_idempotent() {
        let (mut transport, link) = open_pair();
        assert!(link.is_open());
        transport.close();
        transport.close();
        assert!(!link.is_open());
    }

    #[test]
    fn injected_failure_surfaces_as_io_error() {
        let (mut transport, link) = open_pair();
        link.fail_receives(true);
        let mut buf = [0u8; 4];
        assert!(matches!(
            transport.receive(&mut buf),
            Err(TransportError::Io(_))
        ));
    }
}
