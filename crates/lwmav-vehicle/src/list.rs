//! Doubly linked lists threaded through an index arena.
//!
//! A [`List`] only stores head, tail and length. The prev/next links live in
//! the arena's slots, so one slot can be moved between lists in O(1) without
//! any allocation. The module knows nothing about what the slots hold.

/// Per-slot link pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

/// Storage that exposes a [`Link`] per slot index.
pub trait LinkArena {
    fn link(&self, index: u32) -> &Link;
    fn link_mut(&mut self, index: u32) -> &mut Link;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct List {
    head: Option<u32>,
    tail: Option<u32>,
    len: u32,
}

impl List {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn head(&self) -> Option<u32> {
        self.head
    }

    pub fn tail(&self) -> Option<u32> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Link `index` at the tail. The slot must not be in any list.
    pub fn push_back<A: LinkArena + ?Sized>(&mut self, arena: &mut A, index: u32) {
        *arena.link_mut(index) = Link {
            prev: self.tail,
            next: None,
        };
        match self.tail {
            Some(tail) => arena.link_mut(tail).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
        self.len += 1;
    }

    /// Unlink `index`. The slot must be a member of this list.
    pub fn remove<A: LinkArena + ?Sized>(&mut self, arena: &mut A, index: u32) {
        let Link { prev, next } = *arena.link(index);
        match prev {
            Some(prev) => arena.link_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.link_mut(next).prev = prev,
            None => self.tail = prev,
        }
        *arena.link_mut(index) = Link::default();
        self.len -= 1;
    }

    /// Move every node of `other` to the tail of `self`, leaving `other` empty.
    pub fn append<A: LinkArena + ?Sized>(&mut self, other: &mut List, arena: &mut A) {
        let Some(other_head) = other.head else {
            return;
        };
        match self.tail {
            Some(tail) => {
                arena.link_mut(tail).next = Some(other_head);
                arena.link_mut(other_head).prev = Some(tail);
            }
            None => self.head = Some(other_head),
        }
        self.tail = other.tail;
        self.len += other.len;
        *other = List::new();
    }

    /// Successor of `index` as currently linked.
    pub fn next_of<A: LinkArena + ?Sized>(arena: &A, index: u32) -> Option<u32> {
        arena.link(index).next
    }

    pub fn iter<'a, A: LinkArena + ?Sized>(&self, arena: &'a A) -> Iter<'a, A> {
        Iter {
            arena,
            cursor: self.head,
        }
    }
}

pub struct Iter<'a, A: ?Sized> {
    arena: &'a A,
    cursor: Option<u32>,
}

impl<A: LinkArena + ?Sized> Iterator for Iter<'_, A> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let current = self.cursor?;
        self.cursor = self.arena.link(current).next;
        Some(current)
    }
}
