use std::rc::Rc;
use std::time::Duration;

use lwmav_frame::{Message, MessageData};
use lwmav_transport::{TransportParams, TransportRegistry};
use tracing::{debug, warn};

use crate::config::{VehicleConfig, DEFAULT_COMMAND_TIMEOUT, DEFAULT_TARGET_COMPONENT, DEFAULT_TARGET_SYSTEM};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::pool::{FnHandler, HandleRef, HandlerPool, MessageHandler};
use crate::registry::Registry;

/// One remote vehicle: a connection, its handler pool and dispatch
/// registry, and the ids used to address it.
///
/// All dispatch and every executing action is driven from [`spin_once`]
/// on the thread that owns the vehicle.
///
/// [`spin_once`]: Vehicle::spin_once
#[derive(Debug)]
pub struct Vehicle {
    conn: Connection,
    pool: HandlerPool,
    registry: Registry,
    target_system: u8,
    target_component: u8,
    command_timeout: Duration,
}

impl Vehicle {
    pub fn new() -> Self {
        Self::with_parts(Connection::new(), HandlerPool::new(), Registry::new())
    }

    pub fn with_config(config: &VehicleConfig) -> Self {
        let mut vehicle = Self::with_parts(
            Connection::new(),
            HandlerPool::with_capacity(config.pool_capacity),
            Registry::with_capacity(config.registry_capacity),
        );
        vehicle
            .conn
            .set_identity(config.system_id, config.component_id);
        vehicle.set_target(config.target_system, config.target_component);
        vehicle.command_timeout = config.command_timeout();
        vehicle
    }

    /// A vehicle whose connection resolves backends through `transports`.
    pub fn with_transports(transports: TransportRegistry) -> Self {
        Self::with_parts(
            Connection::with_transports(transports),
            HandlerPool::new(),
            Registry::new(),
        )
    }

    fn with_parts(conn: Connection, pool: HandlerPool, registry: Registry) -> Self {
        Self {
            conn,
            pool,
            registry,
            target_system: DEFAULT_TARGET_SYSTEM,
            target_component: DEFAULT_TARGET_COMPONENT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn open(&mut self, params: &TransportParams) -> Result<()> {
        self.conn.open(params)
    }

    pub fn close(&mut self) {
        self.conn.close();
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn pool(&self) -> &HandlerPool {
        &self.pool
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn system_id(&self) -> u8 {
        self.conn.identity().0
    }

    pub fn component_id(&self) -> u8 {
        self.conn.identity().1
    }

    pub fn set_identity(&mut self, system_id: u8, component_id: u8) {
        self.conn.set_identity(system_id, component_id);
    }

    pub fn target_system(&self) -> u8 {
        self.target_system
    }

    pub fn target_component(&self) -> u8 {
        self.target_component
    }

    pub fn set_target(&mut self, system: u8, component: u8) {
        self.target_system = system;
        self.target_component = component;
    }

    /// Timeout applied by the synchronous convenience commands.
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn set_command_timeout(&mut self, timeout: Duration) {
        self.command_timeout = timeout;
    }

    pub fn send(&mut self, msg: &mut Message) -> Result<()> {
        self.conn.send(msg)
    }

    /// Encode and send a typed payload.
    pub fn send_payload<T: MessageData>(&mut self, payload: &T) -> Result<()> {
        let mut msg = Message::from_data(payload);
        self.conn.send(&mut msg)
    }

    /// Receive at most one message and dispatch it.
    ///
    /// An idle link ([`Error::NoData`]) counts as success.
    pub fn spin_once(&mut self) -> Result<()> {
        self.next_message().map(drop)
    }

    /// [`spin_once`](Self::spin_once) that also hands back the message it
    /// dispatched, whether or not anything was subscribed to it.
    pub fn next_message(&mut self) -> Result<Option<Message>> {
        match self.conn.receive() {
            Ok(msg) => {
                self.dispatch(&msg);
                Ok(Some(msg))
            }
            Err(Error::NoData) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Spin until the link fails, returning the error that ended it.
    pub fn spin(&mut self) -> Error {
        loop {
            if let Err(err) = self.spin_once() {
                return err;
            }
        }
    }

    /// Spin until `stop` returns true or the link fails.
    pub fn spin_until(&mut self, mut stop: impl FnMut() -> bool) -> Result<()> {
        while !stop() {
            self.spin_once()?;
        }
        Ok(())
    }

    /// Deliver `msg` to every handler subscribed to its id.
    ///
    /// Handlers added during the pass wait for the next message with that
    /// id. The successor of each handler is captured before the handler
    /// runs, so a handler may remove itself or any handler after its
    /// successor. If the captured successor is removed, iteration resumes
    /// from the current handler's new successor, or ends the pass when the
    /// current handler is gone too. That last case is a handler bug and
    /// trips a debug assertion.
    pub fn dispatch(&mut self, msg: &Message) {
        let msgid = msg.msgid();
        let Some((entry, mut cursor)) = self.registry.begin_dispatch(&mut self.pool, msgid) else {
            return;
        };

        while let Some(current) = cursor {
            let next = self.registry.next_active(&self.pool, current);
            if let Some(handler) = self.pool.handler(current) {
                handler.handle(self, msg);
            }

            cursor = match next {
                Some(next) if self.registry.is_active_member(&self.pool, entry, next) => Some(next),
                Some(_) if self.registry.is_active_member(&self.pool, entry, current) => {
                    self.registry.next_active(&self.pool, current)
                }
                Some(_) => {
                    warn!(msgid, "successor unlinked by another handler, ending dispatch pass");
                    debug_assert!(
                        false,
                        "handler for msgid {msgid} unlinked itself and its captured successor"
                    );
                    None
                }
                None => None,
            };
        }
    }

    /// Subscribe a plain callback to `msgid`.
    pub fn subscribe<F>(&mut self, msgid: u32, callback: F) -> Result<HandleRef>
    where
        F: FnMut(&mut Vehicle, &Message) + 'static,
    {
        self.register_handler(msgid, Rc::new(FnHandler::new(callback)))
    }

    /// Unsubscribe and release a handler. Returns false for a stale handle.
    pub fn unsubscribe(&mut self, handle: HandleRef) -> bool {
        self.destroy_handler(handle)
    }

    /// Allocate a slot for `handler` and subscribe it to `msgid`.
    pub fn register_handler(
        &mut self,
        msgid: u32,
        handler: Rc<dyn MessageHandler>,
    ) -> Result<HandleRef> {
        let handle = self.pool.allocate(handler).ok_or(Error::NoMem)?;
        if let Err(err) = self.registry.add(&mut self.pool, msgid, handle) {
            self.pool.free(handle);
            return Err(err);
        }
        debug!(msgid, handle = %handle, "handler registered");
        Ok(handle)
    }

    /// Unlink `handle` from the registry, then release its slot.
    pub fn destroy_handler(&mut self, handle: HandleRef) -> bool {
        self.registry.remove_all(&mut self.pool, handle);
        self.pool.free(handle)
    }

    /// Handlers currently subscribed to `msgid`, active first.
    pub fn handlers_for(&self, msgid: u32) -> Vec<HandleRef> {
        self.registry.handlers_for(&self.pool, msgid)
    }
}

impl Default for Vehicle {
    fn default() -> Self {
        Self::new()
    }
}
