//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Coordinate WAL, MemTable, and Storage
//! - Handle concurrent read/write access
//! - Trigger flushes when MemTable is full, and compaction when SSTables pile up
//! - Manage crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::config::Config;
use crate::error::{FerrokvError, Result};
use crate::memtable::{MemTable, MemTableEntry};
use crate::protocol::Command;
use crate::storage::StorageManager;
use crate::wal::{Operation, WalRecovery, WalWriter};

/// Encode a range result as `[count: u32 BE]` followed by `count` repetitions
/// of `[key_len: u32 BE][key][val_len: u32 BE][value]`. This is the payload
/// carried inside a RANGE response's OK envelope.
fn encode_range_payload(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(pairs.len() as u32).to_be_bytes());
    for (key, value) in pairs {
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
        buf.extend_from_slice(value);
    }
    buf
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader (SWMR)
///
/// - **Writes** (put/delete/batch_put/flush/compact): Serialized by `write_lock`
///   - Only ONE write operation at a time
///   - Must acquire: write_lock → WAL → memtable → storage (write)
///
/// - **Reads** (get/range): Never take `write_lock`
///   - MemTable uses its own internal `RwLock` (many concurrent readers)
///   - StorageManager uses its own internal `RwLock` over its generation list
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Directory for all data files (SSTables)
    storage_dir: PathBuf,

    /// Write-ahead log for durability (exclusive access needed)
    wal: Mutex<WalWriter>,

    /// In-memory table for recent writes (internal RwLock)
    memtable: MemTable,

    /// Persistent storage manager (internal RwLock on sstables vec)
    storage: StorageManager,

    /// Serializes write operations (put/delete/batch_put/flush/compact)
    write_lock: Mutex<()>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const SSTABLE_DIR: &'static str = "sstables";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create data directory
    /// 2. Load existing SSTables
    /// 3. Replay WAL into the MemTable if one exists (without flushing it)
    /// 4. Ready to serve requests
    pub fn open(config: Config) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let storage_dir = config.data_dir.join(Self::SSTABLE_DIR);
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);

        fs::create_dir_all(&storage_dir)?;

        let storage = StorageManager::open(&storage_dir)?;
        let memtable = MemTable::new();

        // Recovery: replay the WAL into the MemTable only. We deliberately do
        // NOT flush here — the recovered data is only durable once it has
        // actually been fsync'd as part of an SSTable, and forcing a flush on
        // every open would turn a clean restart into an unconditional write
        // amplification event. The WAL is reopened in append mode so the
        // replayed records stay on disk until the next real flush truncates
        // it; if the process crashes again before that, recovery just runs
        // again from the same WAL.
        let wal = if wal_path.exists() {
            let (entries, recovery_result) = WalRecovery::recover(&wal_path)?;

            if recovery_result.entries_recovered > 0 || recovery_result.entries_corrupted > 0 {
                tracing::info!(
                    recovered = recovery_result.entries_recovered,
                    corrupted = recovery_result.entries_corrupted,
                    last_lsn = recovery_result.last_lsn,
                    truncated = recovery_result.was_truncated,
                    "WAL recovery complete"
                );
            }

            for entry in entries {
                match entry.operation {
                    Operation::Put { key, value } => {
                        memtable.put(key, value);
                    }
                    Operation::Delete { key } => {
                        memtable.delete(key);
                    }
                    Operation::BatchPut { keys, values } => {
                        for (key, value) in keys.into_iter().zip(values.into_iter()) {
                            memtable.put(key, value);
                        }
                    }
                }
            }

            let next_lsn = recovery_result.last_lsn + 1;
            WalWriter::open_append(&wal_path, config.wal_sync_strategy, next_lsn)?
        } else {
            WalWriter::open(&wal_path, config.wal_sync_strategy)?
        };

        Ok(Self {
            config,
            storage_dir,
            wal: Mutex::new(wal),
            memtable,
            storage,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let mut config = Config::default();
        config.data_dir = path.to_path_buf();
        Self::open(config)
    }

    /// Execute a command
    ///
    /// Routes commands to appropriate handlers
    pub fn execute(&self, command: Command) -> Result<Option<Vec<u8>>> {
        match command {
            Command::Get { key } => self.get(&key),
            Command::Put { key, value } => {
                self.put(&key, &value)?;
                Ok(None)
            }
            Command::Delete { key } => {
                self.delete(&key)?;
                Ok(None)
            }
            Command::Ping => Ok(Some(b"PONG".to_vec())),
            Command::BatchPut { keys, values } => {
                self.batch_put(keys, values)?;
                Ok(None)
            }
            Command::Range { lo, hi } => {
                let pairs = self.range(&lo, &hi)?;
                Ok(Some(encode_range_payload(&pairs)))
            }
        }
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. MemTable (most recent writes)
    /// 2. SSTables (newest to oldest)
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(entry) = self.memtable.get(key) {
            return match entry {
                MemTableEntry::Value(value) => Ok(Some(value)),
                MemTableEntry::Tombstone => Ok(None),
            };
        }

        self.storage.get(key)
    }

    /// Ascending range scan over `lo..=hi`, merging the MemTable over the
    /// SSTable layers (MemTable wins on overlap, since it is always newer).
    pub fn range(&self, lo: &[u8], hi: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if lo > hi {
            return Err(FerrokvError::InvalidArgument(
                "range lower bound must not exceed upper bound".to_string(),
            ));
        }

        use std::collections::BTreeMap;

        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = self
            .storage
            .range(lo, hi)?
            .into_iter()
            .map(|(k, v)| (k, Some(v)))
            .collect();

        for (key, entry) in self.memtable.range_all(lo, hi) {
            match entry {
                MemTableEntry::Value(value) => {
                    merged.insert(key, Some(value));
                }
                MemTableEntry::Tombstone => {
                    merged.insert(key, None);
                }
            }
        }

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|val| (k, val)))
            .collect())
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Write to WAL (durability)
    /// 3. Write to MemTable
    /// 4. Check if flush needed
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            FerrokvError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        {
            let mut wal = self.wal.lock().map_err(|e| {
                FerrokvError::LockPoisoned(format!("WAL lock poisoned: {}", e))
            })?;

            wal.append(Operation::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            })?;
        }

        self.memtable.put(key.to_vec(), value.to_vec());

        if self.memtable.is_full(self.config.memtable_max_entries) {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Delete a key
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Write tombstone to WAL
    /// 3. Write tombstone to MemTable
    /// 4. Check if flush needed
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            FerrokvError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        {
            let mut wal = self.wal.lock().map_err(|e| {
                FerrokvError::LockPoisoned(format!("WAL lock poisoned: {}", e))
            })?;

            wal.append(Operation::Delete {
                key: key.to_vec(),
            })?;
        }

        self.memtable.delete(key.to_vec());

        if self.memtable.is_full(self.config.memtable_max_entries) {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Put multiple key-value pairs atomically: a single WAL record covers
    /// the whole batch, so recovery either sees all of them or none of them.
    pub fn batch_put(&self, keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Result<()> {
        if keys.len() != values.len() {
            return Err(FerrokvError::InvalidArgument(
                "batch_put requires keys and values of equal length".to_string(),
            ));
        }
        if keys.is_empty() {
            return Ok(());
        }

        let _write_guard = self.write_lock.lock().map_err(|e| {
            FerrokvError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        {
            let mut wal = self.wal.lock().map_err(|e| {
                FerrokvError::LockPoisoned(format!("WAL lock poisoned: {}", e))
            })?;

            wal.append(Operation::BatchPut {
                keys: keys.clone(),
                values: values.clone(),
            })?;
        }

        for (key, value) in keys.into_iter().zip(values.into_iter()) {
            self.memtable.put(key, value);
        }

        if self.memtable.is_full(self.config.memtable_max_entries) {
            self.flush_internal()?;
        }

        Ok(())
    }

    /// Flush memtable to disk (public API)
    ///
    /// Forces a flush regardless of memtable size
    pub fn flush(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            FerrokvError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        self.flush_internal()
    }

    /// Force a full-merge compaction of all SSTables (public API)
    pub fn compact(&self) -> Result<()> {
        let _write_guard = self.write_lock.lock().map_err(|e| {
            FerrokvError::LockPoisoned(format!("Write lock poisoned: {}", e))
        })?;

        self.storage.compact()
    }

    /// Internal flush implementation (called with write lock held)
    ///
    /// 1. Flush MemTable to a new SSTable (fsync'd, durable)
    /// 2. Clear the MemTable
    /// 3. Truncate the WAL (its entries are now durable in the SSTable)
    /// 4. If the SSTable count crossed the compaction threshold, compact
    fn flush_internal(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.storage.flush(&self.memtable)?;
        self.memtable.clear();

        {
            let mut wal = self.wal.lock().map_err(|e| {
                FerrokvError::LockPoisoned(format!("WAL lock poisoned: {}", e))
            })?;

            wal.truncate()?;
        }

        if self.storage.sstable_count() > self.config.compaction_threshold {
            tracing::debug!(
                sstables = self.storage.sstable_count(),
                threshold = self.config.compaction_threshold,
                "compaction threshold exceeded, compacting"
            );
            self.storage.compact()?;
        }

        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Flushes any pending data and syncs to disk
    pub fn close(self) -> Result<()> {
        if !self.memtable.is_empty() {
            self.flush()?;
        }

        {
            let mut wal = self.wal.lock().map_err(|e| {
                FerrokvError::LockPoisoned(format!("WAL lock poisoned: {}", e))
            })?;

            wal.sync()?;
        }

        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the storage directory path (where SSTables are stored)
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Get the current memtable size
    pub fn memtable_size(&self) -> usize {
        self.memtable.size()
    }

    /// Get the memtable entry count
    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    /// Get the number of SSTables
    pub fn sstable_count(&self) -> usize {
        self.storage.sstable_count()
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
