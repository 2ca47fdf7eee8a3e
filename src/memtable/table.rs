//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::MemTableEntry;

/// In-memory table for recent writes
///
/// All methods take `&self`; synchronization is internal (`RwLock` over the
/// map, `AtomicUsize` for size) so the MemTable can be shared behind an
/// `Arc` without an outer lock.
pub struct MemTable {
    data: RwLock<BTreeMap<Vec<u8>, MemTableEntry>>,
    size: AtomicUsize,
}

fn entry_size(key: &[u8], entry: &MemTableEntry) -> usize {
    match entry {
        MemTableEntry::Value(v) => key.len() + v.len(),
        MemTableEntry::Tombstone => key.len(),
    }
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get a value by key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<MemTableEntry> {
        self.data.read().get(key).cloned()
    }

    /// Put a key-value pair (write lock). Returns the new approximate size.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) -> usize {
        let new_entry = MemTableEntry::Value(value);
        let new_size = entry_size(&key, &new_entry);

        let mut data = self.data.write();
        let old = data.insert(key.clone(), new_entry);
        let old_size = old.map(|e| entry_size(&key, &e)).unwrap_or(0);
        drop(data);

        self.adjust_size(old_size, new_size)
    }

    /// Delete a key (write lock, inserts tombstone). Returns the new approximate size.
    pub fn delete(&self, key: Vec<u8>) -> usize {
        let new_size = key.len();

        let mut data = self.data.write();
        let old = data.insert(key.clone(), MemTableEntry::Tombstone);
        let old_size = old.map(|e| entry_size(&key, &e)).unwrap_or(0);
        drop(data);

        self.adjust_size(old_size, new_size)
    }

    fn adjust_size(&self, old_size: usize, new_size: usize) -> usize {
        let prev = if new_size >= old_size {
            self.size.fetch_add(new_size - old_size, Ordering::SeqCst)
        } else {
            self.size.fetch_sub(old_size - new_size, Ordering::SeqCst)
        };
        prev.wrapping_add(new_size).wrapping_sub(old_size)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    /// Get entry count (includes tombstones)
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// True if the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// True once entry count (including tombstones) reaches `max_entries`.
    pub fn is_full(&self, max_entries: usize) -> bool {
        self.entry_count() >= max_entries
    }

    /// Ascending snapshot over non-tombstoned entries with lo <= key <= hi.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .read()
            .range(lo.to_vec()..=hi.to_vec())
            .filter_map(|(k, v)| match v {
                MemTableEntry::Value(val) => Some((k.clone(), val.clone())),
                MemTableEntry::Tombstone => None,
            })
            .collect()
    }

    /// Ascending snapshot over all entries (tombstones included) with
    /// lo <= key <= hi. Used when a caller needs to overlay MemTable state,
    /// deletions and all, on top of an older layer.
    pub fn range_all(&self, lo: &[u8], hi: &[u8]) -> Vec<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .range(lo.to_vec()..=hi.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Get a snapshot of all entries (for flush), sorted key order.
    /// Clones data; does not mutate the table.
    pub fn iter(&self) -> Vec<(Vec<u8>, MemTableEntry)> {
        self.data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Clear all entries (after successful flush)
    pub fn clear(&self) {
        self.data.write().clear();
        self.size.store(0, Ordering::SeqCst);
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}
