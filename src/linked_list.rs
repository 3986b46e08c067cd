//! Doubly linked list over a generational arena.
//!
//! Queues of waiting jobs, a thread's active flows and the asset manager's
//! registered monitors are all kept in a [`LinkedList`]. Entries are
//! addressed by [`EntryId`] so removal is O(1) from anywhere in the list.
//! An optional observer fires whenever the list transitions to empty by
//! removal, which is how an emptied monitor unregisters itself.

use crate::arena::{Arena, ArenaIndex};

/// Handle to an entry of a [`LinkedList`].
pub type EntryId = ArenaIndex;

/// Observer invoked when the last entry is removed.
pub type LastEntryRemoved = Box<dyn FnMut() + Send>;

struct Node<T> {
    value: T,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

pub struct LinkedList<T> {
    nodes: Arena<Node<T>>,
    head: Option<EntryId>,
    tail: Option<EntryId>,
    on_last_removed: Option<LastEntryRemoved>,
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LinkedList<T> {
    pub fn new() -> Self {
        Self {
            nodes: Arena::new(),
            head: None,
            tail: None,
            on_last_removed: None,
        }
    }

    /// Creates a list that notifies `observer` each time it is emptied by removal.
    pub fn with_last_entry_observer(observer: LastEntryRemoved) -> Self {
        Self {
            on_last_removed: Some(observer),
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn head(&self) -> Option<&T> {
        self.head.and_then(|id| self.get(id))
    }

    pub fn get(&self, id: EntryId) -> Option<&T> {
        self.nodes.get(id).map(|node| &node.value)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut T> {
        self.nodes.get_mut(id).map(|node| &mut node.value)
    }

    /// Appends to the tail.
    pub fn add_entry(&mut self, value: T) -> EntryId {
        let id = self.nodes.insert(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(tail) => {
                if let Some(node) = self.nodes.get_mut(tail) {
                    node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        id
    }

    /// Unlinks the entry. Returns `None` when the entry is no longer in the list.
    pub fn remove_entry(&mut self, id: EntryId) -> Option<T> {
        let node = self.nodes.remove(id)?;
        match node.prev {
            Some(prev) => {
                if let Some(prev_node) = self.nodes.get_mut(prev) {
                    prev_node.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => {
                if let Some(next_node) = self.nodes.get_mut(next) {
                    next_node.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        if self.nodes.is_empty() {
            self.notify_emptied();
        }
        Some(node.value)
    }

    /// Removes every entry in list order.
    pub fn purge_entries(&mut self) -> Vec<T> {
        if self.nodes.is_empty() {
            return Vec::new();
        }
        let mut values = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            match self.nodes.remove(id) {
                Some(node) => {
                    cursor = node.next;
                    values.push(node.value);
                }
                None => break,
            }
        }
        self.head = None;
        self.tail = None;
        self.notify_emptied();
        values
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    pub fn entry_ids(&self) -> Vec<EntryId> {
        let mut ids = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(id) = cursor {
            ids.push(id);
            cursor = self.nodes.get(id).and_then(|node| node.next);
        }
        ids
    }

    fn notify_emptied(&mut self) {
        if let Some(observer) = self.on_last_removed.as_mut() {
            observer();
        }
    }
}

impl<T: Clone> LinkedList<T> {
    /// Snapshot of the entries in list order.
    pub fn copy_entries(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

pub struct Iter<'a, T> {
    list: &'a LinkedList<T>,
    cursor: Option<EntryId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        let node = self.list.nodes.get(id)?;
        self.cursor = node.next;
        Some(&node.value)
    }
}
