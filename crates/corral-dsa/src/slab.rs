use alloc::vec::Vec;
use core::fmt;

/// Index-stable handle into a [`Slab`].
///
/// The version is bumped every time a slot is vacated, so an id that
/// outlives its entry never resolves to whatever reuses the slot later.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    index: u32,
    version: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.version)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.version)
    }
}

enum Entry<T> {
    Vacant,
    Occupied(T),
    /// Temporarily moved out by [`Slab::take`]; the slot stays reserved.
    Leased,
}

struct Slot<T> {
    version: u32,
    entry: Entry<T>,
}

/// A generational slot map.
///
/// Entries keep their index for their whole lifetime. An entry can be
/// leased out (`take`) while the rest of the slab is mutated, then either
/// restored in place or vacated.
pub struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Slab<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Number of occupied or leased slots. A value taken out with
    /// [`Slab::take`] still counts until it is vacated.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn insert(&mut self, value: T) -> SlotId {
        self.insert_with(|_| value)
    }

    /// Inserts the value produced by `make`, which receives the id the
    /// value will live under.
    pub fn insert_with(&mut self, make: impl FnOnce(SlotId) -> T) -> SlotId {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    version: 0,
                    entry: Entry::Vacant,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let slot = &mut self.slots[index as usize];
        let id = SlotId {
            index,
            version: slot.version,
        };
        slot.entry = Entry::Occupied(make(id));
        self.live += 1;
        id
    }

    fn slot(&self, id: SlotId) -> Option<&Slot<T>> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.version == id.version)
    }

    fn slot_mut(&mut self, id: SlotId) -> Option<&mut Slot<T>> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.version == id.version)
    }

    /// True if `id` refers to a live entry, leased or not.
    pub fn contains(&self, id: SlotId) -> bool {
        matches!(
            self.slot(id).map(|slot| &slot.entry),
            Some(Entry::Occupied(_)) | Some(Entry::Leased)
        )
    }

    pub fn is_leased(&self, id: SlotId) -> bool {
        matches!(self.slot(id).map(|slot| &slot.entry), Some(Entry::Leased))
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match &self.slot(id)?.entry {
            Entry::Occupied(value) => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match &mut self.slot_mut(id)?.entry {
            Entry::Occupied(value) => Some(value),
            _ => None,
        }
    }

    /// Current id of the live entry at `index`, if any.
    pub fn id_at(&self, index: usize) -> Option<SlotId> {
        let slot = self.slots.get(index)?;
        match slot.entry {
            Entry::Vacant => None,
            _ => Some(SlotId {
                index: index as u32,
                version: slot.version,
            }),
        }
    }

    /// Removes an occupied entry and frees its slot.
    pub fn remove(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slot_mut(id)?;
        if !matches!(slot.entry, Entry::Occupied(_)) {
            return None;
        }
        let Entry::Occupied(value) = core::mem::replace(&mut slot.entry, Entry::Vacant) else {
            return None;
        };
        slot.version = slot.version.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    /// Moves an entry out while keeping its slot reserved.
    pub fn take(&mut self, id: SlotId) -> Option<T> {
        let slot = self.slot_mut(id)?;
        if !matches!(slot.entry, Entry::Occupied(_)) {
            return None;
        }
        match core::mem::replace(&mut slot.entry, Entry::Leased) {
            Entry::Occupied(value) => Some(value),
            _ => None,
        }
    }

    /// Puts a leased entry back. Hands the value back if `id` is not leased.
    pub fn restore(&mut self, id: SlotId, value: T) -> Result<(), T> {
        match self.slot_mut(id) {
            Some(slot) if matches!(slot.entry, Entry::Leased) => {
                slot.entry = Entry::Occupied(value);
                Ok(())
            }
            _ => {
                tracing::warn!("Slab: restore into slot {} which is not leased", id);
                Err(value)
            }
        }
    }

    /// Frees a leased slot without putting anything back.
    pub fn vacate(&mut self, id: SlotId) -> bool {
        let Some(slot) = self.slot_mut(id) else {
            return false;
        };
        if !matches!(slot.entry, Entry::Leased) {
            return false;
        }
        slot.entry = Entry::Vacant;
        slot.version = slot.version.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        true
    }

    /// Snapshot of every live id in slot order, leased slots included.
    pub fn ids(&self) -> Vec<SlotId> {
        (0..self.slots.len()).filter_map(|i| self.id_at(i)).collect()
    }

    /// Iterates occupied entries. Leased entries are skipped.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match &slot.entry {
            Entry::Occupied(value) => Some((
                SlotId {
                    index: i as u32,
                    version: slot.version,
                },
                value,
            )),
            _ => None,
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match &mut slot.entry {
                Entry::Occupied(value) => Some((
                    SlotId {
                        index: i as u32,
                        version: slot.version,
                    },
                    value,
                )),
                _ => None,
            })
    }
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Slab<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slab")
            .field("slots", &self.slots.len())
            .field("live", &self.live)
            .finish()
    }
}
