use parking_lot::Mutex;

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

struct Slots<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    live: usize,
}

/// Arena of open-file handles addressed by generation-checked ids.
///
/// An id packs `(generation << 32) | index` and is never zero, so it can
/// travel through the kernel's 64-bit file handle field. Removing a handle
/// bumps its slot's generation; stale ids then fail to resolve.
pub struct HandleTable<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        HandleTable {
            slots: Mutex::new(Slots {
                entries: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn insert(&self, value: T) -> u64 {
        let mut slots = self.slots.lock();
        slots.live += 1;
        if let Some(index) = slots.free.pop() {
            let entry = &mut slots.entries[index as usize];
            entry.value = Some(value);
            return encode(entry.generation, index);
        }
        let index = slots.entries.len() as u32;
        // Generations start at 1 so that no id is ever 0.
        slots.entries.push(Entry {
            generation: 1,
            value: Some(value),
        });
        encode(1, index)
    }

    /// Release `id`. Returns `None` if it was already released or never issued.
    pub fn remove(&self, id: u64) -> Option<T> {
        let (generation, index) = decode(id);
        let mut slots = self.slots.lock();
        let entry = slots.entries.get_mut(index as usize)?;
        if entry.generation != generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1).max(1);
        slots.free.push(index);
        slots.live -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> HandleTable<T> {
    /// Copy of the value behind `id`, if it is live.
    pub fn get(&self, id: u64) -> Option<T> {
        let (generation, index) = decode(id);
        let slots = self.slots.lock();
        let entry = slots.entries.get(index as usize)?;
        if entry.generation != generation {
            return None;
        }
        entry.value.clone()
    }
}

fn encode(generation: u32, index: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

fn decode(id: u64) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}
