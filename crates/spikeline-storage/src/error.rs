//! Error types for the storage layer

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        #[from]
        /// Source I/O error
        source: std::io::Error,
    },

    /// Stream length is not a whole number of records
    #[error("Truncated stream: {length} bytes is not a multiple of {record_size}-byte records")]
    Truncated {
        /// Stream length in bytes
        length: u64,
        /// Record size in bytes
        record_size: usize,
    },

    /// Record index out of range
    #[error("Record {index} out of range: stream holds {count} records")]
    OutOfRange {
        /// Requested record index
        index: usize,
        /// Number of records in the stream
        count: usize,
    },

    /// Invalid record content
    #[error("Invalid record: {reason}")]
    InvalidRecord {
        /// Reason the record is invalid
        reason: String,
    },
}

impl StorageError {
    /// Create an invalid record error
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::Truncated {
            length: 13,
            record_size: 8,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("13 bytes"));
        assert!(msg.contains("8-byte"));
    }
}
