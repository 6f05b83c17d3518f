//! Generational arena for runtime tables.
//!
//! The fiber table and the scope table are both arenas: records live in a
//! `Vec` of slots, and handles are `(index, generation)` pairs. Removing a
//! record bumps the slot's generation, so a stale handle (a fiber id kept by
//! a scope entry after the fiber finished, for example) resolves to `None`
//! instead of aliasing whatever record reuses the slot.
//!
//! No unsafe code; vacant slots are recycled through a LIFO free list.

use core::fmt;
use core::hash::{Hash, Hasher};

/// An index into an [`Arena`] with a generation counter for ABA safety.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an arena index from raw parts.
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the slot position.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation the slot had when this index was issued.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.index, self.generation)
    }
}

impl Hash for ArenaIndex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64((u64::from(self.index) << 32) | u64::from(self.generation));
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A slot table with generation-checked indices.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no record is live.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its index.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.insert_with(|_| value)
    }

    /// Inserts the value built by `f`, which receives the index the value
    /// will live at. Records that embed their own id use this.
    pub fn insert_with<F>(&mut self, f: F) -> ArenaIndex
    where
        F: FnOnce(ArenaIndex) -> T,
    {
        self.len += 1;
        if let Some(position) = self.free.pop() {
            let slot = &mut self.slots[position as usize];
            let index = ArenaIndex::new(position, slot.generation);
            slot.value = Some(f(index));
            return index;
        }
        let position = u32::try_from(self.slots.len()).expect("arena index space exhausted");
        let index = ArenaIndex::new(position, 0);
        self.slots.push(Slot {
            generation: 0,
            value: Some(f(index)),
        });
        index
    }

    /// Removes and returns the record at `index`, if it is still live.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index.index);
        self.len -= 1;
        Some(value)
    }

    /// Returns the record at `index`, if it is still live.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        let slot = self.slots.get(index.index as usize)?;
        if slot.generation == index.generation {
            slot.value.as_ref()
        } else {
            None
        }
    }

    /// Returns the record at `index` mutably, if it is still live.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        let slot = self.slots.get_mut(index.index as usize)?;
        if slot.generation == index.generation {
            slot.value.as_mut()
        } else {
            None
        }
    }

    /// Returns true if `index` resolves to a live record.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over live records in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(position, slot)| {
            slot.value
                .as_ref()
                .map(|value| (ArenaIndex::new(position as u32, slot.generation), value))
        })
    }

    /// Removes every live record, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for (position, slot) in self.slots.iter_mut().enumerate() {
            if let Some(value) = slot.value.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(position as u32);
                out.push(value);
            }
        }
        self.len = 0;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut arena = Arena::new();
        let idx = arena.insert("fiber");
        assert_eq!(arena.get(idx), Some(&"fiber"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_alias_reused_slot() {
        let mut arena = Arena::new();
        let first = arena.insert(1);
        assert_eq!(arena.remove(first), Some(1));

        let second = arena.insert(2);
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&2));
        assert_eq!(arena.remove(first), None);
    }

    #[test]
    fn insert_with_sees_final_index() {
        let mut arena = Arena::new();
        let _ = arena.insert(0u32);
        let idx = arena.insert_with(ArenaIndex::index);
        assert_eq!(arena.get(idx), Some(&1));
    }

    #[test]
    fn drain_empties_and_invalidates() {
        let mut arena = Arena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        assert_eq!(arena.drain(), vec!['a', 'b']);
        assert!(arena.is_empty());
        assert!(!arena.contains(a));
        assert!(!arena.contains(b));
    }
}
