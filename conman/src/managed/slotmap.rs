use alloc::vec::Vec;

/// Provides a slotmap with owned elements.
///
/// A slotmap provides a `Vec`-like interface where each entry is associated with a stable
/// index-like key. Lookup with the key will detect if an entry has been removed but does not
/// require any lifetime relation.
///
/// ## Usage
///
/// The map can be bounded at construction time, in which case insertion fails instead of growing
/// beyond the given number of elements.
///
/// ```
/// # use conman::managed::SlotMap;
/// let mut map = SlotMap::with_limit(1024);
/// let index = map.insert(42).unwrap();
/// assert_eq!(map.get(index).cloned(), Some(42));
/// assert_eq!(map.remove(index), Some(42));
/// assert_eq!(map.get(index), None);
/// ```
#[derive(Debug)]
pub struct SlotMap<T> {
    entries: Vec<Entry<T>>,
    generation: Generation,
    /// Head of the list of free entries.
    free_top: Option<usize>,
    len: usize,
    limit: usize,
}

/// An index into a slotmap.
///
/// The index remains valid until the entry is removed. If accessing the slotmap with the index
/// again after the entry was removed will fail, even if the index where the element was previously
/// stored has been reused for another element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    idx: usize,
    generation: Generation,
}

#[derive(Debug)]
enum Entry<T> {
    Occupied {
        generation: Generation,
        value: T,
    },
    /// A free entry, linking to the next free one.
    Free {
        next: Option<usize>,
    },
}

/// The generation counter.
///
/// Has strictly positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Generation(isize);

impl<T> SlotMap<T> {
    /// Create an unbounded slotmap.
    pub fn new() -> Self {
        Self::with_limit(usize::max_value())
    }

    /// Create a slotmap holding at most `limit` elements at the same time.
    pub fn with_limit(limit: usize) -> Self {
        SlotMap {
            entries: Vec::new(),
            generation: Generation::default(),
            free_top: None,
            len: 0,
            limit,
        }
    }

    /// The number of elements currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if there are no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if the key refers to a live element.
    pub fn contains_key(&self, index: Key) -> bool {
        self.get(index).is_some()
    }

    /// Retrieve a value by index.
    pub fn get(&self, index: Key) -> Option<&T> {
        match self.entries.get(index.idx)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Retrieve a mutable value by index.
    pub fn get_mut(&mut self, index: Key) -> Option<&mut T> {
        match self.entries.get_mut(index.idx)? {
            Entry::Occupied { generation, value } if *generation == index.generation => Some(value),
            _ => None,
        }
    }

    /// Insert a value, returning its new key.
    ///
    /// Returns `None` if the map already holds as many elements as its limit permits.
    pub fn insert(&mut self, value: T) -> Option<Key> {
        if self.len >= self.limit {
            return None;
        }

        let generation = self.generation;
        let entry = Entry::Occupied { generation, value };

        let idx = match self.free_top {
            Some(idx) => {
                let next = match self.entries[idx] {
                    Entry::Free { next } => next,
                    Entry::Occupied { .. } => unreachable!("Free list points to an occupied entry"),
                };
                self.free_top = next;
                self.entries[idx] = entry;
                idx
            },
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            },
        };

        self.generation.advance();
        self.len += 1;
        Some(Key { idx, generation })
    }

    /// Remove an element.
    ///
    /// If successful, return the removed element. Returns `None` if the provided index did not
    /// refer to an element that could be freed.
    pub fn remove(&mut self, index: Key) -> Option<T> {
        if !self.contains_key(index) {
            return None;
        }

        let free = Entry::Free { next: self.free_top };
        let old = core::mem::replace(&mut self.entries[index.idx], free);
        self.free_top = Some(index.idx);
        self.len -= 1;

        match old {
            Entry::Occupied { value, .. } => Some(value),
            Entry::Free { .. } => None,
        }
    }

    /// Iterate over all live elements and their keys.
    pub fn iter(&self) -> impl Iterator<Item=(Key, &T)> + '_ {
        self.entries.iter().enumerate().filter_map(|(idx, entry)| match entry {
            Entry::Occupied { generation, value } => Some((Key { idx, generation: *generation }, value)),
            Entry::Free { .. } => None,
        })
    }

    /// Iterate mutably over all live elements and their keys.
    pub fn iter_mut(&mut self) -> impl Iterator<Item=(Key, &mut T)> + '_ {
        self.entries.iter_mut().enumerate().filter_map(|(idx, entry)| match entry {
            Entry::Occupied { generation, value } => Some((Key { idx, generation: *generation }, value)),
            Entry::Free { .. } => None,
        })
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        SlotMap::new()
    }
}

impl Generation {
    fn advance(&mut self) {
        assert!(self.0 > 0);
        self.0 = self.0.wrapping_add(1).max(1)
    }
}

impl Default for Generation {
    fn default() -> Self {
        Generation(1)
    }
}
