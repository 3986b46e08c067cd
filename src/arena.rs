//! Generational arena.
//!
//! Records are addressed by [`ArenaIndex`] (slot + generation). Removing a
//! record bumps the slot generation, so an index held past removal resolves
//! to `None` instead of aliasing whatever reuses the slot.

use std::fmt;

/// Stable handle into an [`Arena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    pub fn slot(&self) -> usize {
        self.slot as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

impl fmt::Display for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Vec-backed storage with a free list.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some((slot, generation)) = self.pop_free() {
            self.slots[slot as usize] = Slot::Occupied { generation, value };
            return ArenaIndex { slot, generation };
        }

        let slot = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        ArenaIndex {
            slot,
            generation: 0,
        }
    }

    /// Unlinks the head of the free list. A head that does not name a vacant
    /// slot ends the list.
    fn pop_free(&mut self) -> Option<(u32, u32)> {
        let slot = self.free_head.take()?;
        match self.slots.get(slot as usize)? {
            Slot::Vacant {
                generation,
                next_free,
            } => {
                self.free_head = *next_free;
                Some((slot, *generation))
            }
            Slot::Occupied { .. } => None,
        }
    }

    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        match self.slots.get(index.slot())? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(index.slot())? {
            Slot::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.slots.get_mut(index.slot())?;
        match entry {
            Slot::Occupied { generation, .. } if *generation == index.generation => {}
            _ => return None,
        }
        let next_generation = index.generation.wrapping_add(1);
        let previous = std::mem::replace(
            entry,
            Slot::Vacant {
                generation: next_generation,
                next_free: self.free_head,
            },
        );
        self.free_head = Some(index.slot);
        self.len -= 1;
        match previous {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Removes every record, invalidating all outstanding indices.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        for slot in 0..self.slots.len() {
            if let Slot::Occupied { generation, .. } = &self.slots[slot] {
                let index = ArenaIndex {
                    slot: slot as u32,
                    generation: *generation,
                };
                if let Some(value) = self.remove(index) {
                    values.push(value);
                }
            }
        }
        values
    }

    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| match entry {
                Slot::Occupied { generation, value } => Some((
                    ArenaIndex {
                        slot: slot as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}
