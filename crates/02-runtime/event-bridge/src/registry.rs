//! Generational handle table.
//!
//! A handle packs `(generation << 32) | (index + 1)`. The `+ 1` keeps every
//! live handle away from [`Handle::NULL`]; bumping the generation on removal
//! makes a stale handle miss even after its index is reused.

use event_codec::Handle;

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

pub struct HandleRegistry<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Stores `value` and returns its handle.
    ///
    /// # Panics
    ///
    /// If more than `u32::MAX - 1` entries are live at once.
    pub fn insert(&mut self, value: T) -> Handle {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.entries.len())
                    .ok()
                    .filter(|index| *index < u32::MAX)
                    .expect("handle registry index space exhausted");
                self.entries.push(Entry {
                    generation: 0,
                    value: None,
                });
                index
            }
        };

        let entry = &mut self.entries[index as usize];
        debug_assert!(entry.value.is_none());
        entry.value = Some(value);
        self.len += 1;
        pack(index, entry.generation)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let (index, generation) = unpack(handle)?;
        self.entries
            .get(index as usize)
            .filter(|entry| entry.generation == generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        let (index, generation) = unpack(handle)?;
        self.entries
            .get_mut(index as usize)
            .filter(|entry| entry.generation == generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Takes the value out; `handle` and every copy of it go stale.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let (index, generation) = unpack(handle)?;
        let entry = self
            .entries
            .get_mut(index as usize)
            .filter(|entry| entry.generation == generation)?;
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every live value, yielding it with its handle.
    ///
    /// Entries not yet reached stay registered if the iterator is dropped early.
    pub fn drain(&mut self) -> impl Iterator<Item = (Handle, T)> + '_ {
        let free = &mut self.free;
        let len = &mut self.len;
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(move |(index, entry)| {
                let value = entry.value.take()?;
                let handle = pack(index as u32, entry.generation);
                entry.generation = entry.generation.wrapping_add(1);
                free.push(index as u32);
                *len -= 1;
                Some((handle, value))
            })
    }
}

impl<T> std::fmt::Debug for HandleRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("len", &self.len)
            .field("capacity", &self.entries.len())
            .finish()
    }
}

fn pack(index: u32, generation: u32) -> Handle {
    Handle((u64::from(generation) << 32) | (u64::from(index) + 1))
}

fn unpack(handle: Handle) -> Option<(u32, u32)> {
    let low = (handle.0 & 0xFFFF_FFFF) as u32;
    let index = low.checked_sub(1)?;
    Some((index, (handle.0 >> 32) as u32))
}
