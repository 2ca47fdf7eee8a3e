//! Storage Manager
//!
//! Manages multiple SSTables and coordinates reads/writes/compaction.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{FerrokvError, Result};
use crate::memtable::{MemTable, MemTableEntry};

use super::sstable::{SSTable, SSTableBuilder, SSTableReader};

const SSTABLE_PREFIX: &str = "sstable_";
const SSTABLE_SUFFIX: &str = ".dat";
const COMPACTED_SUFFIX: &str = "_compacted.dat";

/// One generation's worth of on-disk state: the reader kept open for fast
/// lookups, plus the lightweight metadata handle.
struct Generation {
    id: u64,
    meta: SSTable,
    reader: SSTableReader,
}

/// Manages the storage layer: a set of immutable, generation-ordered SSTables.
pub struct StorageManager {
    data_dir: PathBuf,
    /// Ordered oldest (lowest generation) to newest (highest generation).
    generations: RwLock<Vec<Generation>>,
    next_id: RwLock<u64>,
}

/// fsync the directory entry itself, so a new SSTable's presence survives a
/// crash even if the containing directory's metadata hasn't been flushed.
fn fsync_dir(dir: &Path) -> Result<()> {
    let dir_file = fs::File::open(dir)?;
    dir_file.sync_all()?;
    Ok(())
}

fn parse_generation(file_name: &str) -> Option<u64> {
    let rest = file_name.strip_prefix(SSTABLE_PREFIX)?;
    let digits = if let Some(d) = rest.strip_suffix(COMPACTED_SUFFIX) {
        d
    } else {
        rest.strip_suffix(SSTABLE_SUFFIX)?
    };
    digits.parse::<u64>().ok()
}

impl StorageManager {
    /// Open or create storage in the given directory, discovering any
    /// existing SSTables and resuming the generation counter from them.
    pub fn open(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;

        let mut found: Vec<(u64, PathBuf)> = Vec::new();

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let file_path = entry.path();
            if !file_path.is_file() {
                continue;
            }
            let file_name = match file_path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if let Some(generation) = parse_generation(file_name) {
                found.push((generation, file_path));
            }
        }

        found.sort_by_key(|(gen, _)| *gen);

        let mut generations = Vec::with_capacity(found.len());
        let mut max_id = 0u64;

        for (id, file_path) in found {
            let file_size = fs::metadata(&file_path)?.len();
            let reader = SSTableReader::open(&file_path)?;
            let meta = SSTable {
                path: file_path,
                entry_count: reader.entry_count(),
                min_key: reader.min_key().map(|k| k.to_vec()).unwrap_or_default(),
                max_key: reader.max_key().map(|k| k.to_vec()).unwrap_or_default(),
                file_size,
            };
            max_id = max_id.max(id);
            generations.push(Generation { id, meta, reader });
        }

        Ok(Self {
            data_dir: path.to_path_buf(),
            generations: RwLock::new(generations),
            next_id: RwLock::new(max_id + 1),
        })
    }

    /// Next generation id that will be assigned by the next flush/compaction.
    pub fn next_sstable_id(&self) -> u64 {
        *self.next_id.read()
    }

    fn take_generation_id(&self) -> u64 {
        let mut next = self.next_id.write();
        let id = *next;
        *next += 1;
        id
    }

    /// Get a value by key, searching SSTables from newest to oldest.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut generations = self.generations.write();
        for gen in generations.iter_mut().rev() {
            match gen.reader.get(key) {
                Ok(Some(value)) => return Ok(Some(value)),
                Ok(None) => return Ok(None), // tombstone: resolved, stop here
                Err(FerrokvError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    /// Ascending, newest-wins merge of all SSTable ranges for `lo..=hi`,
    /// with tombstones dropped. The MemTable's own range overlay happens at
    /// the Engine layer.
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        use std::collections::BTreeMap;

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        let mut generations = self.generations.write();

        for gen in generations.iter_mut() {
            for result in gen.reader.iter()? {
                let (key, value) = result?;
                if key.as_slice() < lo || key.as_slice() > hi {
                    continue;
                }
                merged.insert(key, value);
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|val| (k, val)))
            .collect())
    }

    /// Flush a MemTable to a new SSTable. Errors if the MemTable is empty.
    ///
    /// The new file (and the directory entry for it) is fsync'd before this
    /// returns, and before the in-memory generation list is updated — a
    /// caller that sees `Ok` can safely truncate the WAL.
    pub fn flush(&self, memtable: &MemTable) -> Result<SSTable> {
        if memtable.is_empty() {
            return Err(FerrokvError::Storage("cannot flush an empty memtable".to_string()));
        }

        let id = self.take_generation_id();
        let file_path = self.data_dir.join(format!("{}{}{}", SSTABLE_PREFIX, id, SSTABLE_SUFFIX));

        let mut builder = SSTableBuilder::new(&file_path)?;
        for (key, entry) in memtable.iter() {
            match entry {
                MemTableEntry::Value(value) => builder.add(&key, &value)?,
                MemTableEntry::Tombstone => builder.add_tombstone(&key)?,
            }
        }
        let meta = builder.finish()?;
        fsync_dir(&self.data_dir)?;
        let reader = SSTableReader::open(&file_path)?;

        self.generations.write().push(Generation { id, meta: meta.clone(), reader });

        Ok(meta)
    }

    /// Number of SSTables currently live.
    pub fn sstable_count(&self) -> usize {
        self.generations.read().len()
    }

    /// Metadata for all live SSTables, oldest to newest.
    pub fn sstables(&self) -> Vec<SSTable> {
        self.generations.read().iter().map(|g| g.meta.clone()).collect()
    }

    /// Full-merge compaction: walk all SSTables oldest-to-newest, keep only
    /// the newest value-or-tombstone per key, drop tombstones, and write the
    /// result as a single new compacted SSTable. Old files are unlinked only
    /// after the new file and in-memory list have been swapped in.
    pub fn compact(&self) -> Result<()> {
        use std::collections::BTreeMap;

        let mut generations = self.generations.write();
        if generations.len() < 2 {
            return Ok(());
        }

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
        for gen in generations.iter_mut() {
            for result in gen.reader.iter()? {
                let (key, value) = result?;
                merged.insert(key, value);
            }
        }

        let id = {
            let mut next = self.next_id.write();
            let assigned = *next;
            *next += 1;
            assigned
        };
        let file_path = self
            .data_dir
            .join(format!("{}{}{}", SSTABLE_PREFIX, id, COMPACTED_SUFFIX));

        let mut builder = SSTableBuilder::new(&file_path)?;
        for (key, value) in merged.into_iter() {
            match value {
                Some(v) => builder.add(&key, &v)?,
                None => {} // tombstones are garbage-collected on compaction
            }
        }
        let meta = builder.finish()?;
        fsync_dir(&self.data_dir)?;
        let reader = SSTableReader::open(&file_path)?;

        let old_paths: Vec<PathBuf> = generations.iter().map(|g| g.meta.path.clone()).collect();

        *generations = vec![Generation { id, meta, reader }];
        drop(generations);

        for old_path in old_paths {
            if old_path != file_path {
                let _ = fs::remove_file(old_path);
            }
        }

        Ok(())
    }
}
