// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Slot storage addressed by generation-checked indices.
//!
//! Removing a value bumps the slot's generation, so an [`Index`] handed out
//! before the removal no longer resolves even after the slot is reused.

use crate::{Error, Result};

/// Position of a value in an [`Arena`], plus the generation it was stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Index {
    slot: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Arena<T> {
    pub fn insert(&mut self, value: T) -> Result<Index> {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            debug_assert!(entry.value.is_none());
            entry.value = Some(value);
            self.live += 1;
            return Ok(Index { slot, generation: entry.generation });
        }
        let slot = u32::try_from(self.slots.len()).map_err(|_| Error::ResourceLimitExceeded("arena is full"))?;
        self.slots.try_reserve(1)?;
        // Reserve the free-list entry now so `remove` never has to allocate.
        self.free.try_reserve(self.slots.len() + 1 - self.free.len())?;
        self.slots.push(Slot { generation: 0, value: Some(value) });
        self.live += 1;
        Ok(Index { slot, generation: 0 })
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        self.slots
            .get(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    /// Take the value out and retire `index`. Stale indices are ignored.
    pub fn remove(&mut self, index: Index) -> Option<T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        self.live -= 1;
        match entry.generation.checked_add(1) {
            Some(next) => {
                entry.generation = next;
                self.free.push(index.slot);
            },
            // Exhausted slots are never handed out again.
            None => log::debug!("retiring arena slot {}", index.slot),
        }
        Some(value)
    }

    /// Remove every value; all outstanding indices become stale.
    pub fn clear(&mut self) {
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry.value.take().is_none() {
                continue;
            }
            self.live -= 1;
            match entry.generation.checked_add(1) {
                Some(next) => {
                    entry.generation = next;
                    // Capacity was reserved by `insert`.
                    self.free.push(slot as u32);
                },
                None => log::debug!("retiring arena slot {slot}"),
            }
        }
        debug_assert_eq!(self.live, 0);
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            let value = entry.value.as_ref()?;
            Some((Index { slot: slot as u32, generation: entry.generation }, value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_index_goes_stale() {
        let mut arena = Arena::default();
        let a = arena.insert("a").unwrap();
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 0);
    }

    #[test]
    fn reused_slot_does_not_resolve_old_index() {
        let mut arena = Arena::default();
        let a = arena.insert(1).unwrap();
        arena.remove(a);
        let b = arena.insert(2).unwrap();
        assert_eq!(a.slot, b.slot);
        assert_ne!(a, b);
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn clear_invalidates_everything() {
        let mut arena = Arena::default();
        let ids: Vec<_> = (0..4).map(|i| arena.insert(i).unwrap()).collect();
        arena.clear();
        assert_eq!(arena.len(), 0);
        assert!(ids.iter().all(|&id| !arena.contains(id)));
        assert_eq!(arena.iter().count(), 0);

        let reused = arena.insert(9).unwrap();
        assert!(ids.iter().any(|id| id.slot == reused.slot));
        assert!(!ids.contains(&reused));
        assert_eq!(arena.slots.len(), 4);
    }

    #[test]
    fn clear_after_partial_removal() {
        let mut arena = Arena::default();
        let a = arena.insert('a').unwrap();
        let b = arena.insert('b').unwrap();
        arena.remove(a);
        arena.clear();
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.free.len(), 2);
        assert!(!arena.contains(b));
    }

    #[test]
    fn exhausted_generation_retires_slot() {
        let mut arena = Arena::default();
        let a = arena.insert(()).unwrap();
        arena.slots[a.slot as usize].generation = u32::MAX;
        let stale = Index { slot: a.slot, generation: u32::MAX };
        arena.remove(stale);
        let b = arena.insert(()).unwrap();
        assert_ne!(b.slot, a.slot);
    }
}
