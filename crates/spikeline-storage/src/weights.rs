//! Weight snapshot streams
//!
//! A snapshot stream is a headerless sequence of `f32` values, little-endian.
//! Each snapshot holds one value per synapse in synapse-insertion order;
//! successive snapshots are appended back to back, so a stream of length
//! `k * synapse_count` holds `k` snapshots.

use crate::error::{Result, StorageError};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

const VALUE_SIZE: usize = 4;

/// Buffered writer appending whole weight snapshots
#[derive(Debug)]
pub struct WeightSnapshotWriter {
    writer: BufWriter<File>,
    snapshots_written: u64,
}

impl WeightSnapshotWriter {
    /// Create a new snapshot stream, truncating any existing file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            snapshots_written: 0,
        })
    }

    /// Append one snapshot of the full weight vector
    pub fn write_snapshot(&mut self, weights: &[f32]) -> Result<()> {
        for w in weights {
            self.writer.write_all(&w.to_le_bytes())?;
        }
        self.snapshots_written += 1;
        Ok(())
    }

    /// Flush buffered values to the underlying file
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of snapshots written through this writer
    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written
    }
}

impl Drop for WeightSnapshotWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("weight snapshot flush on drop failed: {}", e);
        }
    }
}

/// Memory-mapped reader over a weight snapshot stream
#[derive(Debug)]
pub struct WeightSnapshotReader {
    map: Mmap,
    stride: usize,
    snapshots: usize,
}

impl WeightSnapshotReader {
    /// Open a snapshot stream whose snapshots each hold `synapse_count` values
    pub fn open(path: impl AsRef<Path>, synapse_count: usize) -> Result<Self> {
        if synapse_count == 0 {
            return Err(StorageError::invalid_record(
                "snapshot stride must be non-zero",
            ));
        }
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let stride_bytes = (synapse_count * VALUE_SIZE) as u64;
        if len % stride_bytes != 0 {
            return Err(StorageError::Truncated {
                length: len,
                record_size: synapse_count * VALUE_SIZE,
            });
        }
        // Safety: the map is read-only and the file is not mutated through it
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self {
            map,
            stride: synapse_count,
            snapshots: (len / stride_bytes) as usize,
        })
    }

    /// Number of snapshots in the stream
    pub fn len(&self) -> usize {
        self.snapshots
    }

    /// Whether the stream holds no snapshots
    pub fn is_empty(&self) -> bool {
        self.snapshots == 0
    }

    /// Decode the snapshot at `index` into an owned weight vector
    pub fn snapshot(&self, index: usize) -> Result<Vec<f32>> {
        if index >= self.snapshots {
            return Err(StorageError::OutOfRange {
                index,
                count: self.snapshots,
            });
        }
        let start = index * self.stride * VALUE_SIZE;
        let end = start + self.stride * VALUE_SIZE;
        let weights = self.map[start..end]
            .chunks_exact(VALUE_SIZE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.bin");

        let first = vec![0.5f32, 1.5, -2.0];
        let second = vec![0.25f32, 1.25, -1.0];

        let mut writer = WeightSnapshotWriter::create(&path).unwrap();
        writer.write_snapshot(&first).unwrap();
        writer.write_snapshot(&second).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let reader = WeightSnapshotReader::open(&path, 3).unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.snapshot(0).unwrap(), first);
        assert_eq!(reader.snapshot(1).unwrap(), second);
        assert!(reader.snapshot(2).is_err());
    }

    #[test]
    fn test_stride_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("weights.bin");

        let mut writer = WeightSnapshotWriter::create(&path).unwrap();
        writer.write_snapshot(&[1.0, 2.0, 3.0]).unwrap();
        writer.flush().unwrap();
        drop(writer);

        assert!(matches!(
            WeightSnapshotReader::open(&path, 2),
            Err(StorageError::Truncated { .. })
        ));
    }
}
