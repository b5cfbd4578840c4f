use tracing::debug;

use crate::error::{Error, Result};
use crate::list::List;
use crate::pool::{HandleRef, HandlerPool, ListKind, Owner};

/// Default number of distinct message ids a registry can track.
pub const REGISTRY_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef(u32);

#[derive(Debug)]
struct Entry {
    msgid: u32,
    active: List,
    pending: List,
}

/// Message id to handler-list table.
///
/// New subscriptions always land on an entry's pending list. Pending
/// handlers are spliced onto the active list when the next dispatch for
/// that id begins, so a handler registered during a dispatch pass is never
/// invoked by that same pass.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Entry>,
    capacity: usize,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_capacity(REGISTRY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of message ids that have an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn find(&self, msgid: u32) -> Option<EntryRef> {
        self.entries
            .iter()
            .position(|entry| entry.msgid == msgid)
            .map(|index| EntryRef(index as u32))
    }

    /// Look up the entry for `msgid`, creating it on first reference.
    pub fn find_or_create(&mut self, msgid: u32) -> Result<EntryRef> {
        if let Some(entry) = self.find(msgid) {
            return Ok(entry);
        }
        if self.entries.len() >= self.capacity {
            return Err(Error::NoMem);
        }
        self.entries.push(Entry {
            msgid,
            active: List::new(),
            pending: List::new(),
        });
        debug!(msgid, entries = self.entries.len(), "registry entry created");
        Ok(EntryRef((self.entries.len() - 1) as u32))
    }

    /// Subscribe `handle` to `msgid` via the pending list.
    ///
    /// Adding a handler that is already subscribed to `msgid` is a no-op. A
    /// handler linked under a different id must be removed first.
    pub fn add(&mut self, pool: &mut HandlerPool, msgid: u32, handle: HandleRef) -> Result<()> {
        if !pool.is_live(handle) {
            return Err(Error::BadParam(format!("handler {handle} is not allocated")));
        }
        let entry = self.find_or_create(msgid)?;
        match pool.owner(handle) {
            Some(owner) if owner.entry == entry.0 => return Ok(()),
            Some(_) => {
                return Err(Error::BadParam(format!(
                    "handler {handle} is already subscribed to another message"
                )))
            }
            None => {}
        }

        self.entries[entry.0 as usize]
            .pending
            .push_back(pool, handle.index());
        pool.set_owner_at(
            handle.index(),
            Some(Owner {
                entry: entry.0,
                list: ListKind::Pending,
            }),
        );
        Ok(())
    }

    /// Unsubscribe `handle` from `msgid`. Returns whether it was linked there.
    pub fn remove(&mut self, pool: &mut HandlerPool, msgid: u32, handle: HandleRef) -> bool {
        let Some(entry) = self.find(msgid) else {
            return false;
        };
        match pool.owner(handle) {
            Some(owner) if owner.entry == entry.0 => {
                self.unlink(pool, owner, handle.index());
                true
            }
            _ => false,
        }
    }

    /// Unlink `handle` from whichever entry list holds it. Returns the
    /// number of lists it was removed from (0 or 1).
    pub fn remove_all(&mut self, pool: &mut HandlerPool, handle: HandleRef) -> usize {
        if !pool.is_live(handle) {
            return 0;
        }
        let mut removed = 0;
        for index in 0..self.entries.len() as u32 {
            if let Some(owner) = pool.owner(handle).filter(|owner| owner.entry == index) {
                self.unlink(pool, owner, handle.index());
                removed += 1;
            }
        }
        removed
    }

    fn unlink(&mut self, pool: &mut HandlerPool, owner: Owner, index: u32) {
        let entry = &mut self.entries[owner.entry as usize];
        match owner.list {
            ListKind::Active => entry.active.remove(pool, index),
            ListKind::Pending => entry.pending.remove(pool, index),
        }
        pool.set_owner_at(index, None);
    }

    /// Start a dispatch pass for `msgid`: splice pending onto active and
    /// return the entry with the first active handler. `None` for an id
    /// nobody ever subscribed to.
    pub fn begin_dispatch(
        &mut self,
        pool: &mut HandlerPool,
        msgid: u32,
    ) -> Option<(EntryRef, Option<HandleRef>)> {
        let entry_ref = self.find(msgid)?;
        let entry = &mut self.entries[entry_ref.0 as usize];

        if !entry.pending.is_empty() {
            let spliced: Vec<u32> = entry.pending.iter(&*pool).collect();
            let mut pending = std::mem::take(&mut entry.pending);
            entry.active.append(&mut pending, pool);
            for index in spliced {
                pool.set_owner_at(
                    index,
                    Some(Owner {
                        entry: entry_ref.0,
                        list: ListKind::Active,
                    }),
                );
            }
        }

        let head = entry.active.head().and_then(|index| pool.handle_at(index));
        Some((entry_ref, head))
    }

    /// Successor of `handle` in its active list, as currently linked.
    pub fn next_active(&self, pool: &HandlerPool, handle: HandleRef) -> Option<HandleRef> {
        let owner = pool.owner(handle)?;
        if owner.list != ListKind::Active {
            return None;
        }
        List::next_of(pool, handle.index()).and_then(|index| pool.handle_at(index))
    }

    /// True if `handle` is live and linked into `entry`'s active list.
    pub fn is_active_member(&self, pool: &HandlerPool, entry: EntryRef, handle: HandleRef) -> bool {
        pool.owner(handle)
            == Some(Owner {
                entry: entry.0,
                list: ListKind::Active,
            })
    }

    /// Handlers subscribed to `msgid`: active list first, then pending.
    pub fn handlers_for(&self, pool: &HandlerPool, msgid: u32) -> Vec<HandleRef> {
        let Some(entry) = self.find(msgid) else {
            return Vec::new();
        };
        let entry = &self.entries[entry.0 as usize];
        entry
            .active
            .iter(pool)
            .chain(entry.pending.iter(pool))
            .filter_map(|index| pool.handle_at(index))
            .collect()
    }

    /// Number of handlers waiting on `msgid`'s pending list.
    pub fn pending_len(&self, msgid: u32) -> usize {
        self.find(msgid)
            .map_or(0, |entry| self.entries[entry.0 as usize].pending.len())
    }

    /// Owning entry's message id for a subscribed handler.
    pub fn subscription_of(&self, pool: &HandlerPool, handle: HandleRef) -> Option<u32> {
        pool.owner(handle)
            .map(|owner| self.entries[owner.entry as usize].msgid)
    }

    #[cfg(test)]
    pub(crate) fn owner_list(pool: &HandlerPool, index: u32) -> Option<ListKind> {
        pool.handle_at(index)
            .and_then(|handle| pool.owner(handle))
            .map(|owner| owner.list)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
