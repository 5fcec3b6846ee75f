//! Generational Arena
//!
//! Storage for every world-owned object (bodies, constraints, forces,
//! springs, controllers, detectors). Slots are reused after removal, but each
//! reuse bumps the slot generation so a stale [`Handle`] never resolves to
//! the new occupant.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

/// Typed, generation-checked index into an [`Arena`].
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    #[inline]
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Slot index
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at creation time
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a non-zero integer (generation in the high half)
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`Handle::to_bits`]
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// Slot arena with generation-checked handles
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let generation = match slot {
                Slot::Vacant { generation } => generation.wrapping_add(1),
                Slot::Occupied { generation, .. } => generation.wrapping_add(1),
            };
            *slot = Slot::Occupied { generation, value };
            Handle::new(index, generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            });
            Handle::new(index, 0)
        }
    }

    /// Remove and return the value behind `handle`, if it is still live
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == handle.generation => {
                let generation = *generation;
                let old = core::mem::replace(slot, Slot::Vacant { generation });
                self.free.push(handle.index);
                self.len -= 1;
                match old {
                    Slot::Occupied { value, .. } => Some(value),
                    Slot::Vacant { .. } => None,
                }
            }
            _ => None,
        }
    }

    /// True when `handle` refers to a live value
    #[inline]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    /// Shared access
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Exclusive access
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Occupied { generation, value } if *generation == handle.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Number of live values
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when no value is live
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate live `(handle, &value)` pairs in slot order
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(i as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Iterate live `(handle, &mut value)` pairs in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { generation, value } => {
                    Some((Handle::new(i as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Live handles, in slot order
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(h, _)| h).collect()
    }

    /// Remove every value for which `keep` returns false
    pub fn retain(&mut self, mut keep: impl FnMut(Handle<T>, &mut T) -> bool) -> Vec<T> {
        let mut removed = Vec::new();
        for h in self.handles() {
            let drop_it = match self.get_mut(h) {
                Some(v) => !keep(h, v),
                None => false,
            };
            if drop_it {
                if let Some(v) = self.remove(h) {
                    removed.push(v);
                }
            }
        }
        removed
    }

    /// Drop every value; outstanding handles become stale
    pub fn clear(&mut self) {
        for h in self.handles() {
            self.remove(h);
        }
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Arena<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let c = arena.insert(2);
        assert_eq!(a.index(), c.index());
        assert_ne!(a, c);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.get(c), Some(&2));
    }

    #[test]
    fn test_bits_roundtrip() {
        let mut arena = Arena::new();
        let a = arena.insert(());
        arena.remove(a);
        let b = arena.insert(());
        let back: Handle<()> = Handle::from_bits(b.to_bits());
        assert_eq!(back, b);
        assert_eq!(b.generation(), 1);
    }

    #[test]
    fn test_retain_and_clear() {
        let mut arena = Arena::new();
        for i in 0..10 {
            arena.insert(i);
        }
        let removed = arena.retain(|_, v| *v % 2 == 0);
        assert_eq!(removed.len(), 5);
        assert!(arena.iter().all(|(_, v)| v % 2 == 0));
        arena.clear();
        assert!(arena.is_empty());
    }
}
