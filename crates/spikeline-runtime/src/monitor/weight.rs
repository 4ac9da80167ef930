//! Weight snapshot monitor

use crate::error::{Result, SimulatorError};
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;
use spikeline_storage::WeightSnapshotWriter;

use std::path::{Path, PathBuf};

use super::ActivityMonitor;

/// Periodically snapshots the weight vector in synapse-insertion order
///
/// With a sink attached each snapshot appends to the snapshot stream;
/// without one snapshots collect in memory. The monitor can also write the
/// initial weights once, the first time the model finalizes.
#[derive(Debug)]
pub struct WeightMonitor {
    interval: f32,
    sink: Option<WeightSnapshotWriter>,
    initial_path: Option<PathBuf>,
    initial_written: bool,
    snapshots: Vec<Vec<f32>>,
    snapshots_taken: u64,
    next_sample: f32,
}

impl WeightMonitor {
    /// Create a monitor sampling every `interval` seconds
    pub fn new(interval: f32) -> Result<Self> {
        if interval <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "interval",
                interval.to_string(),
                "> 0.0",
            ));
        }
        Ok(Self {
            interval,
            sink: None,
            initial_path: None,
            initial_written: false,
            snapshots: Vec::new(),
            snapshots_taken: 0,
            next_sample: 0.0,
        })
    }

    /// Attach a snapshot stream sink at `path`
    pub fn with_sink(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.sink = Some(WeightSnapshotWriter::create(path)?);
        Ok(self)
    }

    /// Also write the initial weights once at finalization
    pub fn with_initial_weights_file(mut self, path: impl AsRef<Path>) -> Self {
        self.initial_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// In-memory snapshots, present when no sink is attached
    pub fn snapshots(&self) -> &[Vec<f32>] {
        &self.snapshots
    }

    /// Number of snapshots taken since the last reset
    pub fn snapshots_taken(&self) -> u64 {
        self.snapshots_taken
    }

    fn take_snapshot(&mut self, weights: &[f32]) -> Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.write_snapshot(weights)?;
        } else {
            self.snapshots.push(weights.to_vec());
        }
        self.snapshots_taken += 1;
        Ok(())
    }
}

impl ActivityMonitor for WeightMonitor {
    fn reset_state(
        &mut self,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        synapses: &SynapseBundle,
    ) -> Result<()> {
        self.snapshots.clear();
        self.snapshots_taken = 0;
        self.next_sample = 0.0;
        if let Some(path) = &self.initial_path {
            if !self.initial_written {
                let mut writer = WeightSnapshotWriter::create(path)?;
                writer.write_snapshot(synapses.weights())?;
                writer.flush()?;
                self.initial_written = true;
            }
        }
        Ok(())
    }

    fn state_update(
        &mut self,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        synapses: &SynapseBundle,
        first_step: u64,
        window: u32,
        dt: f32,
    ) -> Result<()> {
        let window_end = (first_step + window as u64) as f32 * dt;
        while self.next_sample < window_end {
            self.take_snapshot(synapses.weights())?;
            self.next_sample += self.interval;
        }
        Ok(())
    }

    fn final_update(&mut self, _t: f32) -> Result<()> {
        if let Some(sink) = &mut self.sink {
            sink.flush()?;
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neurons::{models::LifParams, NeuronGroupParams, NeuronModel};
    use crate::synapses::{corrected_presynaptic_id, SynapseGroupParams};
    use spikeline_storage::{GroupId, WeightSnapshotReader};
    use tempfile::tempdir;

    fn bundle() -> (NeuronPopulation, InputPopulation, SynapseBundle) {
        let mut neurons = NeuronPopulation::new();
        neurons
            .add_group(&NeuronGroupParams::row(
                2,
                NeuronModel::Lif(LifParams::default()),
            ))
            .unwrap();
        let inputs = InputPopulation::new();
        let mut synapses = SynapseBundle::new();
        let pre = corrected_presynaptic_id(GroupId::new(0), false);
        synapses
            .add_group(
                pre,
                GroupId::new(0),
                &neurons,
                &inputs,
                1e-4,
                &SynapseGroupParams::default(),
            )
            .unwrap();
        (neurons, inputs, synapses)
    }

    #[test]
    fn test_interval_validated() {
        assert!(WeightMonitor::new(0.0).is_err());
        assert!(WeightMonitor::new(0.1).is_ok());
    }

    #[test]
    fn test_sampling_cadence() {
        let (neurons, inputs, synapses) = bundle();
        let mut monitor = WeightMonitor::new(0.001).unwrap();
        monitor.reset_state(&neurons, &inputs, &synapses).unwrap();

        // Two windows of 5 x 0.1ms: only the first crosses a sample point
        monitor
            .state_update(&neurons, &inputs, &synapses, 0, 5, 1e-4)
            .unwrap();
        assert_eq!(monitor.snapshots_taken(), 1);
        monitor
            .state_update(&neurons, &inputs, &synapses, 5, 5, 1e-4)
            .unwrap();
        assert_eq!(monitor.snapshots_taken(), 1);

        // Crossing 1ms takes the next sample
        monitor
            .state_update(&neurons, &inputs, &synapses, 10, 5, 1e-4)
            .unwrap();
        assert_eq!(monitor.snapshots_taken(), 2);
        assert_eq!(monitor.snapshots().len(), 2);
        assert_eq!(monitor.snapshots()[0].len(), synapses.len());
    }

    #[test]
    fn test_initial_weights_written_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("initial.bin");

        let (neurons, inputs, synapses) = bundle();
        let mut monitor = WeightMonitor::new(0.001)
            .unwrap()
            .with_initial_weights_file(&path);
        monitor.reset_state(&neurons, &inputs, &synapses).unwrap();
        monitor.reset_state(&neurons, &inputs, &synapses).unwrap();

        let reader = WeightSnapshotReader::open(&path, synapses.len()).unwrap();
        assert_eq!(reader.len(), 1);
        assert_eq!(reader.snapshot(0).unwrap(), synapses.weights());
    }
}
