use std::collections::HashMap;

use crate::loopback::LoopbackTransport;
use crate::params::TransportKind;
use crate::tcp::TcpTransport;
use crate::traits::Transport;
use crate::udp::UdpTransport;
use crate::udp_client::UdpClientTransport;

/// Builds a fresh, unopened transport.
pub type TransportFactory = fn() -> Box<dyn Transport>;

/// Kind-keyed table of transport factories.
///
/// A connection asks the registry for a backend when it is opened; kinds
/// without a factory are reported as unsupported.
#[derive(Clone)]
pub struct TransportRegistry {
    factories: HashMap<TransportKind, TransportFactory>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every backend available on this platform.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TransportKind::Udp, || Box::new(UdpTransport::new()));
        registry.register(TransportKind::UdpClient, || {
            Box::new(UdpClientTransport::new())
        });
        registry.register(TransportKind::Tcp, || Box::new(TcpTransport::new()));
        registry.register(TransportKind::Loopback, || Box::new(LoopbackTransport::new()));
        #[cfg(unix)]
        registry.register(TransportKind::Serial, || {
            Box::new(crate::serial::SerialTransport::new())
        });
        registry
    }

    /// Register or replace the factory for `kind`.
    pub fn register(&mut self, kind: TransportKind, factory: TransportFactory) {
        self.factories.insert(kind, factory);
    }

    /// Remove the factory for `kind`.
    pub fn unregister(&mut self, kind: TransportKind) -> Option<TransportFactory> {
        self.factories.remove(&kind)
    }

    pub fn supports(&self, kind: TransportKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiate an unopened transport of `kind`.
    pub fn create(&self, kind: TransportKind) -> Option<Box<dyn Transport>> {
        self.factories.get(&kind).map(|factory| factory())
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<String> = self.factories.keys().map(|k| k.to_string()).collect();
        kinds.sort_unstable();
        f.debug_struct("TransportRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_socket_and_loopback_kinds() {
        let registry = TransportRegistry::with_defaults();
        assert!(registry.supports(TransportKind::Udp));
        assert!(registry.supports(TransportKind::UdpClient));
        assert!(registry.supports(TransportKind::Tcp));
        assert!(registry.supports(TransportKind::Loopback));
        #[cfg(unix)]
        assert!(registry.supports(TransportKind::Serial));
    }

    #[test]
    fn created_transport_reports_its_kind() {
        let registry = TransportRegistry::with_defaults();
        let transport = registry.create(TransportKind::Tcp).unwrap();
        assert_eq!(transport.kind(), TransportKind::Tcp);
    }

    #[test]
    fn unregistered_kind_is_unsupported() {
        let mut registry = TransportRegistry::new();
        assert!(registry.create(TransportKind::Udp).is_none());

        registry.register(TransportKind::Udp, || Box::new(UdpTransport::new()));
        assert!(registry.supports(TransportKind::Udp));
        assert!(registry.unregister(TransportKind::Udp).is_some());
        assert!(!registry.supports(TransportKind::Udp));
    }
}
