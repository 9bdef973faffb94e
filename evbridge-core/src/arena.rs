//! Generational slot arena. Keys carry a generation so a key that outlived its value is
//! detected as stale instead of aliasing whatever reused the slot.

use std::fmt;

/// Stable index of a transfer context. This is what the engine carries as opaque context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferKey {
    index: u32,
    generation: u32,
}

impl TransferKey {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }

    /// Pack into a single word, e.g. for an engine that only stores a pointer-sized value.
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for TransferKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
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

    /// Key the next [`Arena::insert`] will return.
    pub fn vacant_key(&self) -> TransferKey {
        match self.free_head {
            Some(index) => match &self.slots[index as usize] {
                Slot::Vacant { generation, .. } => TransferKey {
                    index,
                    generation: *generation,
                },
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            },
            None => TransferKey {
                index: self.slots.len() as u32,
                generation: 0,
            },
        }
    }

    pub fn insert(&mut self, value: T) -> TransferKey {
        let key = self.vacant_key();
        match self.free_head {
            Some(index) => {
                let next_free = match &self.slots[index as usize] {
                    Slot::Vacant { next_free, .. } => *next_free,
                    Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
                };
                self.free_head = next_free;
                self.slots[index as usize] = Slot::Occupied {
                    generation: key.generation,
                    value,
                };
            }
            None => self.slots.push(Slot::Occupied {
                generation: 0,
                value,
            }),
        }
        self.len += 1;
        key
    }

    pub fn contains(&self, key: TransferKey) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: TransferKey) -> Option<&T> {
        match self.slots.get(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, key: TransferKey) -> Option<&mut T> {
        match self.slots.get_mut(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    /// Move the value out. The slot's generation advances, so `key` is stale from here on.
    pub fn remove(&mut self, key: TransferKey) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let vacant = Slot::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = std::mem::replace(slot, vacant) else {
            unreachable!("slot checked occupied above");
        };
        self.free_head = Some(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn keys(&self) -> Vec<TransferKey> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, .. } => Some(TransferKey {
                    index: index as u32,
                    generation: *generation,
                }),
                Slot::Vacant { .. } => None,
            })
            .collect()
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
