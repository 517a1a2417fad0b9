//! Dense table indexed by socket handle.
//!
//! Handle values are reused by the kernel as soon as a socket is closed, so
//! every entry also carries a [`ConnId`] that is never reused. Growth is an
//! explicit doubling policy: capacity only ever increases, and the newly
//! added range is filled with vacant, default-valued entries.

use std::fmt;

/// Logical identity of one accepted connection, unique for the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Entry<T> {
    id: Option<ConnId>,
    value: T,
}

#[derive(Debug)]
pub struct HandleTable<T> {
    entries: Vec<Entry<T>>,
    next_id: u64,
    live: usize,
}

impl<T: Default> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Default> HandleTable<T> {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// `capacity` is rounded up to at least one entry.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::new();
        entries.resize_with(capacity.max(1), Entry::default);
        HandleTable {
            entries,
            next_id: 0,
            live: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Double the capacity until `handle` is a valid index.
    /// Returns whether the table grew.
    pub fn ensure_capacity(&mut self, handle: usize) -> bool {
        let mut capacity = self.entries.len();
        if handle < capacity {
            return false;
        }
        while capacity <= handle {
            capacity *= 2;
        }
        self.entries.resize_with(capacity, Entry::default);
        true
    }

    /// Initialise the entry for a freshly accepted `handle`, growing the
    /// table if needed. Any previous value is discarded.
    pub fn set(&mut self, handle: usize, value: T) -> ConnId {
        self.ensure_capacity(handle);
        let id = ConnId(self.next_id);
        self.next_id += 1;
        let entry = &mut self.entries[handle];
        if entry.id.is_none() {
            self.live += 1;
        }
        entry.id = Some(id);
        entry.value = value;
        id
    }

    /// `None` for handles that were never set or have been removed.
    pub fn get(&self, handle: usize) -> Option<&T> {
        self.entries
            .get(handle)
            .filter(|e| e.id.is_some())
            .map(|e| &e.value)
    }

    pub fn get_mut(&mut self, handle: usize) -> Option<&mut T> {
        self.entries
            .get_mut(handle)
            .filter(|e| e.id.is_some())
            .map(|e| &mut e.value)
    }

    /// Identity of the connection occupying `handle`, if any.
    pub fn id(&self, handle: usize) -> Option<ConnId> {
        self.entries.get(handle).and_then(|e| e.id)
    }

    /// Vacate `handle`, leaving a default value behind so a future
    /// connection on the same handle starts from zero.
    pub fn remove(&mut self, handle: usize) -> Option<T> {
        let entry = self.entries.get_mut(handle)?;
        entry.id.take()?;
        self.live -= 1;
        Some(std::mem::take(&mut entry.value))
    }

    /// Occupied handles in ascending order.
    pub fn handles(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.id.is_some())
            .map(|(h, _)| h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_doubles_until_handle_fits() {
        let mut t: HandleTable<u64> = HandleTable::with_capacity(4);
        assert!(!t.ensure_capacity(3));
        assert_eq!(t.capacity(), 4);
        assert!(t.ensure_capacity(4));
        assert_eq!(t.capacity(), 8);
        assert!(t.ensure_capacity(100));
        assert_eq!(t.capacity(), 128);
    }

    #[test]
    fn growth_preserves_entries_and_zero_fills() {
        let mut t: HandleTable<u64> = HandleTable::with_capacity(2);
        t.set(0, 11);
        t.set(1, 22);
        t.set(9, 99);
        assert_eq!(t.capacity(), 16);
        assert_eq!(t.get(0), Some(&11));
        assert_eq!(t.get(1), Some(&22));
        assert_eq!(t.get(9), Some(&99));
        for h in (2..16).filter(|&h| h != 9) {
            assert_eq!(t.get(h), None);
            assert_eq!(t.entries[h].value, 0);
        }
        assert_eq!(t.len(), 3);
    }

    #[test]
    fn remove_resets_before_reuse() {
        let mut t: HandleTable<u64> = HandleTable::with_capacity(8);
        let first = t.set(5, 0);
        *t.get_mut(5).unwrap() = 1234;
        assert_eq!(t.remove(5), Some(1234));
        assert_eq!(t.get(5), None);
        assert_eq!(t.entries[5].value, 0);
        assert!(t.is_empty());

        let second = t.set(5, u64::default());
        assert_ne!(first, second);
        assert_eq!(t.get(5), Some(&0));
    }

    #[test]
    fn remove_of_vacant_handle_is_none() {
        let mut t: HandleTable<u64> = HandleTable::with_capacity(4);
        assert_eq!(t.remove(2), None);
        assert_eq!(t.remove(400), None);
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut t: HandleTable<()> = HandleTable::with_capacity(1);
        let mut seen = Vec::new();
        for round in 0..10 {
            seen.push(t.set(round % 3, ()));
            t.remove(round % 3);
        }
        let mut dedup = seen.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), seen.len());
    }

    #[test]
    fn handles_lists_occupied_entries() {
        let mut t: HandleTable<u8> = HandleTable::with_capacity(4);
        t.set(3, 1);
        t.set(1, 1);
        t.set(6, 1);
        t.remove(1);
        assert_eq!(t.handles().collect::<Vec<_>>(), vec![3, 6]);
    }
}
