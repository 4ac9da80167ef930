//! Binary record streams and readers for the spikeline simulator
//!
//! This crate owns the simulator's persisted output formats: the append-only
//! spike log and the weight snapshot stream, plus the ID newtypes shared with
//! the runtime. All streams are headerless little-endian record sequences
//! whose counts are implied by file length; readers memory-map the files.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod ids;
pub mod spike_log;
pub mod weights;

pub use error::{Result, StorageError};
pub use ids::{GroupId, NeuronId};
pub use spike_log::{SpikeLogReader, SpikeLogWriter, SpikeRecord};
pub use weights::{WeightSnapshotReader, WeightSnapshotWriter};
