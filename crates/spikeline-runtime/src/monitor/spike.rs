//! Spike event monitor

use crate::context::BackendContext;
use crate::error::Result;
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;
use spikeline_storage::{NeuronId, SpikeLogWriter, SpikeRecord};

use std::path::Path;

use super::{ActivityMonitor, PopulationSelect};

const DEFAULT_CAPACITY: usize = 1_000_000;

/// Records (neuron id, time) pairs from one population
///
/// Samples buffer in memory; with a sink attached the buffer flushes to the
/// spike log whenever it fills and at `final_update`. Without a sink the
/// buffer keeps growing so results can be read back directly.
#[derive(Debug)]
pub struct SpikeMonitor {
    source: PopulationSelect,
    buffer: Vec<SpikeRecord>,
    capacity: usize,
    sink: Option<SpikeLogWriter>,
    total_recorded: u64,
    warned: bool,
}

impl SpikeMonitor {
    /// Create a monitor over one population, buffering in memory
    pub fn new(source: PopulationSelect) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            capacity: DEFAULT_CAPACITY,
            sink: None,
            total_recorded: 0,
            warned: false,
        }
    }

    /// Attach a spike log sink at `path`
    pub fn with_sink(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.sink = Some(SpikeLogWriter::create(path)?);
        Ok(self)
    }

    /// Override the buffer capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Buffered (unflushed) records in time order
    pub fn spikes(&self) -> &[SpikeRecord] {
        &self.buffer
    }

    /// Total records observed, flushed or not
    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    fn flush_to_sink(&mut self) -> Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }
}

impl ActivityMonitor for SpikeMonitor {
    fn init_backend(&mut self, _ctx: &BackendContext) -> Result<()> {
        Ok(())
    }

    fn reset_state(
        &mut self,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        _synapses: &SynapseBundle,
    ) -> Result<()> {
        self.buffer.clear();
        self.total_recorded = 0;
        self.warned = false;
        Ok(())
    }

    fn state_update(
        &mut self,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        _synapses: &SynapseBundle,
        first_step: u64,
        window: u32,
        dt: f32,
    ) -> Result<()> {
        let (store, count) = match self.source {
            PopulationSelect::Ordinary => (neurons.spikes(), neurons.len()),
            PopulationSelect::Input => (inputs.spikes(), inputs.len()),
        };
        // Substep-major scan keeps the buffer strictly time ordered
        for sub in 0..window as u64 {
            let step = first_step + sub;
            let time = step as f32 * dt;
            for i in 0..count {
                if store.spiked_at(i, step) {
                    self.buffer
                        .push(SpikeRecord::new(NeuronId::new(i as u32), time));
                    self.total_recorded += 1;
                }
            }
        }

        if self.buffer.len() >= self.capacity {
            if self.sink.is_some() {
                self.flush_to_sink()?;
            } else if !self.warned {
                log::warn!(
                    "spike monitor buffer passed {} records with no sink attached",
                    self.capacity
                );
                self.warned = true;
            }
        }
        Ok(())
    }

    fn final_update(&mut self, _t: f32) -> Result<()> {
        self.flush_to_sink()?;
        if let Some(sink) = &mut self.sink {
            sink.flush()?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}
