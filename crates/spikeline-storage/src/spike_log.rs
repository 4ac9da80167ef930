//! Append-only spike log stream
//!
//! A spike log is a headerless concatenation of 8-byte records
//! `{ neuron_id: u32, time_s: f32 }`, both little-endian. The record count is
//! implied by the file length.

use crate::{
    error::{Result, StorageError},
    ids::NeuronId,
};

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

/// One spike event as persisted in a spike log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeRecord {
    /// Neuron that fired
    pub neuron_id: NeuronId,
    /// Spike time in simulated seconds
    pub time_s: f32,
}

impl SpikeRecord {
    /// Serialized size of one record in bytes
    pub const SIZE: usize = 8;

    /// Create a new spike record
    pub fn new(neuron_id: NeuronId, time_s: f32) -> Self {
        Self { neuron_id, time_s }
    }

    /// Encode this record into its 8-byte wire form
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&self.neuron_id.raw().to_le_bytes());
        bytes[4..8].copy_from_slice(&self.time_s.to_le_bytes());
        bytes
    }

    /// Decode one record from a byte slice
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::SIZE {
            return Err(StorageError::invalid_record(format!(
                "spike record needs {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }
        let neuron_id = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let time_s = f32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Ok(Self {
            neuron_id: NeuronId::new(neuron_id),
            time_s,
        })
    }
}

/// Buffered append-only writer for a spike log
#[derive(Debug)]
pub struct SpikeLogWriter {
    writer: BufWriter<File>,
    records_written: u64,
}

impl SpikeLogWriter {
    /// Create a new spike log, truncating any existing file at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    /// Open an existing spike log for appending, creating it if absent
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            records_written: 0,
        })
    }

    /// Append one record
    pub fn write_record(&mut self, record: SpikeRecord) -> Result<()> {
        self.writer.write_all(&record.encode())?;
        self.records_written += 1;
        Ok(())
    }

    /// Append a batch of records
    pub fn write_all(&mut self, records: &[SpikeRecord]) -> Result<()> {
        for record in records {
            self.write_record(*record)?;
        }
        Ok(())
    }

    /// Flush buffered records to the underlying file
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of records written through this writer
    pub fn records_written(&self) -> u64 {
        self.records_written
    }
}

impl Drop for SpikeLogWriter {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("spike log flush on drop failed: {}", e);
        }
    }
}

/// Memory-mapped reader over a spike log
#[derive(Debug)]
pub struct SpikeLogReader {
    map: Mmap,
    count: usize,
}

impl SpikeLogReader {
    /// Open a spike log for reading
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        if len % SpikeRecord::SIZE as u64 != 0 {
            return Err(StorageError::Truncated {
                length: len,
                record_size: SpikeRecord::SIZE,
            });
        }
        // Safety: the map is read-only and the file is not mutated through it
        let map = unsafe { Mmap::map(&file)? };
        let count = (len / SpikeRecord::SIZE as u64) as usize;
        Ok(Self { map, count })
    }

    /// Number of records in the log
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the log holds no records
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Read the record at `index`
    pub fn record(&self, index: usize) -> Result<SpikeRecord> {
        if index >= self.count {
            return Err(StorageError::OutOfRange {
                index,
                count: self.count,
            });
        }
        let offset = index * SpikeRecord::SIZE;
        SpikeRecord::decode(&self.map[offset..offset + SpikeRecord::SIZE])
    }

    /// Iterate all records in file order
    pub fn iter(&self) -> impl Iterator<Item = SpikeRecord> + '_ {
        self.map.chunks_exact(SpikeRecord::SIZE).map(|c| SpikeRecord {
            neuron_id: NeuronId::new(u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            time_s: f32::from_le_bytes([c[4], c[5], c[6], c[7]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_record_codec() {
        let record = SpikeRecord::new(NeuronId::new(7), 0.0125);
        let decoded = SpikeRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_short_slice() {
        assert!(SpikeRecord::decode(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spikes.bin");

        let records = vec![
            SpikeRecord::new(NeuronId::new(0), 0.001),
            SpikeRecord::new(NeuronId::new(3), 0.002),
            SpikeRecord::new(NeuronId::new(1), 0.0025),
        ];

        let mut writer = SpikeLogWriter::create(&path).unwrap();
        writer.write_all(&records).unwrap();
        writer.flush().unwrap();
        drop(writer);

        let reader = SpikeLogReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);
        let read: Vec<_> = reader.iter().collect();
        assert_eq!(read, records);
        assert_eq!(reader.record(1).unwrap(), records[1]);
        assert!(reader.record(3).is_err());
    }

    #[test]
    fn test_append_across_writers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spikes.bin");

        {
            let mut writer = SpikeLogWriter::create(&path).unwrap();
            writer
                .write_record(SpikeRecord::new(NeuronId::new(0), 0.1))
                .unwrap();
        }
        {
            let mut writer = SpikeLogWriter::append(&path).unwrap();
            writer
                .write_record(SpikeRecord::new(NeuronId::new(1), 0.2))
                .unwrap();
        }

        let reader = SpikeLogReader::open(&path).unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.record(1).unwrap().neuron_id, NeuronId::new(1));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        std::fs::write(&path, [0u8; 13]).unwrap();
        assert!(matches!(
            SpikeLogReader::open(&path),
            Err(StorageError::Truncated { .. })
        ));
    }
}
