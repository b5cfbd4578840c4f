use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use lwmav_frame::Message;
use tracing::warn;

use crate::list::{Link, LinkArena};
use crate::vehicle::Vehicle;

/// Default number of handler slots per vehicle.
pub const POOL_CAPACITY: usize = 128;

/// Something invokable with an incoming message.
///
/// Handlers receive the vehicle mutably so they can send replies, subscribe
/// or unsubscribe (themselves included) while being dispatched.
pub trait MessageHandler {
    fn handle(&self, vehicle: &mut Vehicle, msg: &Message);
}

/// Adapts an `FnMut` closure into a [`MessageHandler`].
///
/// A closure re-entered while it is already running (a nested spin from
/// inside the callback) skips the nested delivery.
pub struct FnHandler<F> {
    callback: RefCell<F>,
}

impl<F> FnHandler<F>
where
    F: FnMut(&mut Vehicle, &Message),
{
    pub fn new(callback: F) -> Self {
        Self {
            callback: RefCell::new(callback),
        }
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: FnMut(&mut Vehicle, &Message),
{
    fn handle(&self, vehicle: &mut Vehicle, msg: &Message) {
        let Ok(mut callback) = self.callback.try_borrow_mut() else {
            warn!(msgid = msg.msgid(), "handler re-entered during dispatch, skipping");
            return;
        };
        (*callback)(vehicle, msg);
    }
}

/// Generation-checked reference to a pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleRef {
    index: u32,
    generation: u32,
}

impl HandleRef {
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for HandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Which list of a registry entry a handler is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    Active,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Owner {
    pub entry: u32,
    pub list: ListKind,
}

#[derive(Default)]
struct Slot {
    active: bool,
    generation: u32,
    handler: Option<Rc<dyn MessageHandler>>,
    link: Link,
    owner: Option<Owner>,
}

/// Fixed-capacity arena of handler slots.
///
/// Allocation scans for the first free slot; a freed slot is reusable
/// immediately. Stale [`HandleRef`]s are detected by generation.
pub struct HandlerPool {
    slots: Vec<Slot>,
    in_use: usize,
}

impl HandlerPool {
    pub fn new() -> Self {
        Self::with_capacity(POOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, Slot::default);
        Self { slots, in_use: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Claim the first free slot for `handler`. `None` when the pool is full.
    pub fn allocate(&mut self, handler: Rc<dyn MessageHandler>) -> Option<HandleRef> {
        let index = self.slots.iter().position(|slot| !slot.active)?;
        let slot = &mut self.slots[index];
        slot.active = true;
        slot.handler = Some(handler);
        slot.link = Link::default();
        slot.owner = None;
        self.in_use += 1;
        Some(HandleRef {
            index: index as u32,
            generation: slot.generation,
        })
    }

    /// Release a slot. Returns false for a stale or unknown handle.
    ///
    /// The handler must already be unlinked from every registry list.
    pub fn free(&mut self, handle: HandleRef) -> bool {
        let Some(slot) = self.live_slot_mut(handle) else {
            return false;
        };
        if slot.owner.is_some() {
            warn!(handle = %handle, "handler freed while still linked");
        }
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        slot.handler = None;
        slot.link = Link::default();
        slot.owner = None;
        self.in_use -= 1;
        true
    }

    pub fn is_live(&self, handle: HandleRef) -> bool {
        self.live_slot(handle).is_some()
    }

    pub fn handler(&self, handle: HandleRef) -> Option<Rc<dyn MessageHandler>> {
        self.live_slot(handle).and_then(|slot| slot.handler.clone())
    }

    /// Current handle for an active slot index.
    pub(crate) fn handle_at(&self, index: u32) -> Option<HandleRef> {
        let slot = self.slots.get(index as usize)?;
        slot.active.then_some(HandleRef {
            index,
            generation: slot.generation,
        })
    }

    pub(crate) fn owner(&self, handle: HandleRef) -> Option<Owner> {
        self.live_slot(handle).and_then(|slot| slot.owner)
    }

    pub(crate) fn set_owner_at(&mut self, index: u32, owner: Option<Owner>) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.owner = owner;
        }
    }

    fn live_slot(&self, handle: HandleRef) -> Option<&Slot> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
    }

    fn live_slot_mut(&mut self, handle: HandleRef) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.active && slot.generation == handle.generation)
    }
}

impl Default for HandlerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerPool")
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use)
            .finish()
    }
}

impl LinkArena for HandlerPool {
    fn link(&self, index: u32) -> &Link {
        &self.slots[index as usize].link
    }

    fn link_mut(&mut self, index: u32) -> &mut Link {
        &mut self.slots[index as usize].link
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl MessageHandler for Nop {
        fn handle(&self, _vehicle: &mut Vehicle, _msg: &Message) {}
    }

    fn nop() -> Rc<dyn MessageHandler> {
        Rc::new(Nop)
    }

    #[test]
    fn allocate_until_full() {
        let mut pool = HandlerPool::with_capacity(3);
        let handles: Vec<_> = (0..3).map(|_| pool.allocate(nop()).unwrap()).collect();
        assert_eq!(pool.in_use(), 3);
        assert!(pool.allocate(nop()).is_none());

        assert!(pool.free(handles[1]));
        let again = pool.allocate(nop()).unwrap();
        assert_eq!(again.index(), 1);
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut pool = HandlerPool::with_capacity(1);
        let first = pool.allocate(nop()).unwrap();
        assert!(pool.free(first));
        assert!(!pool.free(first));

        let second = pool.allocate(nop()).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first, second);
        assert!(!pool.is_live(first));
        assert!(pool.handler(first).is_none());
        assert!(pool.handler(second).is_some());
    }

    #[test]
    fn first_free_slot_is_reused() {
        let mut pool = HandlerPool::with_capacity(4);
        let a = pool.allocate(nop()).unwrap();
        let _b = pool.allocate(nop()).unwrap();
        let c = pool.allocate(nop()).unwrap();
        pool.free(c);
        pool.free(a);
        assert_eq!(pool.allocate(nop()).unwrap().index(), 0);
        assert_eq!(pool.allocate(nop()).unwrap().index(), 2);
    }

    #[test]
    fn handle_at_reports_current_generation() {
        let mut pool = HandlerPool::with_capacity(2);
        let h = pool.allocate(nop()).unwrap();
        assert_eq!(pool.handle_at(h.index()), Some(h));
        assert_eq!(pool.handle_at(1), None);
        assert_eq!(pool.handle_at(9), None);
    }
}
