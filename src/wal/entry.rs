//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{FerrokvError, Result};

/// Header size: LSN (8) + CRC32 (4) + payload length (4) = 16 bytes
pub const HEADER_SIZE: usize = 16;

/// A single entry in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// The operation to perform
    pub operation: Operation,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },

    /// Put multiple key-value pairs as a single atomic record
    BatchPut { keys: Vec<Vec<u8>>, values: Vec<Vec<u8>> },
}

impl WalEntry {
    /// Create a new entry with the current wall-clock timestamp
    pub fn new(lsn: u64, operation: Operation) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            lsn,
            operation,
            timestamp,
        }
    }

    /// Serialize to the self-delimiting on-disk frame:
    /// `[lsn(8)][crc32(4)][payload_len(4)][payload]`
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(&(&self.operation, self.timestamp))
            .map_err(|e| FerrokvError::Serialization(e.to_string()))?;

        let crc = crc32fast::hash(&payload);
        let payload_len = payload.len() as u32;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&payload_len.to_le_bytes());
        buf.extend_from_slice(&payload);

        Ok(buf)
    }

    /// Deserialize from a buffer containing exactly one frame (header + payload).
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(FerrokvError::WalCorruption(format!(
                "buffer too small for header: {} bytes",
                bytes.len()
            )));
        }

        let lsn = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let crc = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let payload_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

        if bytes.len() < HEADER_SIZE + payload_len {
            return Err(FerrokvError::WalCorruption(format!(
                "truncated entry: expected {} payload bytes, have {}",
                payload_len,
                bytes.len() - HEADER_SIZE
            )));
        }

        let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];

        let actual_crc = crc32fast::hash(payload);
        if actual_crc != crc {
            return Err(FerrokvError::WalCorruption(format!(
                "CRC mismatch at lsn {}: expected {:#x}, got {:#x}",
                lsn, crc, actual_crc
            )));
        }

        let (operation, timestamp): (Operation, u64) = bincode::deserialize(payload)
            .map_err(|e| FerrokvError::WalCorruption(format!("payload decode failed: {}", e)))?;

        Ok(Self {
            lsn,
            operation,
            timestamp,
        })
    }

    /// Compute the CRC32 of this entry's serialized payload
    pub fn compute_crc(&self) -> Result<u32> {
        let payload = bincode::serialize(&(&self.operation, self.timestamp))
            .map_err(|e| FerrokvError::Serialization(e.to_string()))?;
        Ok(crc32fast::hash(&payload))
    }

    /// Total serialized size in bytes (header + payload)
    pub fn serialized_size(&self) -> Result<usize> {
        let payload = bincode::serialize(&(&self.operation, self.timestamp))
            .map_err(|e| FerrokvError::Serialization(e.to_string()))?;
        Ok(HEADER_SIZE + payload.len())
    }
}
