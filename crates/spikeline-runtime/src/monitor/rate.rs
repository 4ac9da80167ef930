//! Per-group firing rate monitor

use crate::error::{Result, SimulatorError};
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;
use spikeline_storage::GroupId;

use super::{ActivityMonitor, PopulationSelect};

/// Counts per-group spikes into fixed time bins
#[derive(Debug)]
pub struct RateMonitor {
    source: PopulationSelect,
    bin_width: f32,
    /// Start index of each group, captured at reset
    group_starts: Vec<usize>,
    group_sizes: Vec<usize>,
    /// Spike counts per group per bin
    counts: Vec<Vec<u32>>,
}

impl RateMonitor {
    /// Create a monitor binning spikes of one population into `bin_width`
    /// second bins
    pub fn new(source: PopulationSelect, bin_width: f32) -> Result<Self> {
        if bin_width <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "bin_width",
                bin_width.to_string(),
                "> 0.0",
            ));
        }
        Ok(Self {
            source,
            bin_width,
            group_starts: Vec::new(),
            group_sizes: Vec::new(),
            counts: Vec::new(),
        })
    }

    /// Raw spike counts of one group, one entry per elapsed bin
    pub fn counts(&self, group: GroupId) -> Result<&[u32]> {
        self.counts
            .get(group.index())
            .map(|c| c.as_slice())
            .ok_or_else(|| SimulatorError::shape(format!("rate monitor has no group {}", group)))
    }

    /// Mean per-neuron firing rates of one group in Hz, one entry per bin
    pub fn rates(&self, group: GroupId) -> Result<Vec<f32>> {
        let counts = self.counts(group)?;
        let size = self.group_sizes[group.index()].max(1) as f32;
        Ok(counts
            .iter()
            .map(|&c| c as f32 / (self.bin_width * size))
            .collect())
    }

    fn group_of(&self, neuron: usize) -> usize {
        // group_starts is sorted; find the last start <= neuron
        self.group_starts.partition_point(|&s| s <= neuron) - 1
    }
}

impl ActivityMonitor for RateMonitor {
    fn reset_state(
        &mut self,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        _synapses: &SynapseBundle,
    ) -> Result<()> {
        let group_count = match self.source {
            PopulationSelect::Ordinary => neurons.group_count(),
            PopulationSelect::Input => inputs.group_count(),
        };
        self.group_starts.clear();
        self.group_sizes.clear();
        for g in 0..group_count {
            let range = match self.source {
                PopulationSelect::Ordinary => neurons.group_range(GroupId::new(g as u32))?,
                PopulationSelect::Input => inputs.group_range(GroupId::new(g as u32))?,
            };
            self.group_starts.push(range.start);
            self.group_sizes.push(range.len());
        }
        self.counts = vec![Vec::new(); group_count];
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
        if self.counts.is_empty() {
            return Ok(());
        }
        let (store, count) = match self.source {
            PopulationSelect::Ordinary => (neurons.spikes(), neurons.len()),
            PopulationSelect::Input => (inputs.spikes(), inputs.len()),
        };
        for i in 0..count {
            let group = self.group_of(i);
            store.visit_window(i, first_step, window, |step| {
                let t = step as f32 * dt;
                let bin = (t / self.bin_width) as usize;
                let bins = &mut self.counts[group];
                if bins.len() <= bin {
                    bins.resize(bin + 1, 0);
                }
                bins[bin] += 1;
            });
        }
        Ok(())
    }

    fn final_update(&mut self, _t: f32) -> Result<()> {
        Ok(())
    }

    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BackendContext, BackendKind};
    use crate::neurons::{InputGroupParams, InputSource};

    #[test]
    fn test_bin_width_validated() {
        assert!(RateMonitor::new(PopulationSelect::Ordinary, 0.0).is_err());
        assert!(RateMonitor::new(PopulationSelect::Ordinary, 0.1).is_ok());
    }

    #[test]
    fn test_counts_per_group_and_bin() {
        let ctx = BackendContext::new(BackendKind::Reference);
        let mut inputs = InputPopulation::new();
        inputs
            .add_group(&InputGroupParams::row(
                1,
                InputSource::PatternReplay {
                    pattern: vec![(0, 0.0001)],
                },
            ))
            .unwrap();
        inputs
            .add_group(&InputGroupParams::row(
                1,
                InputSource::PatternReplay {
                    pattern: vec![(0, 0.0002)],
                },
            ))
            .unwrap();
        inputs.init_backend(&ctx, 4).unwrap();
        inputs.reset_state();

        let neurons = NeuronPopulation::new();
        let synapses = SynapseBundle::new();
        let mut monitor = RateMonitor::new(PopulationSelect::Input, 0.001).unwrap();
        monitor.reset_state(&neurons, &inputs, &synapses).unwrap();

        inputs.state_update(&ctx, 0, 4, 1e-4);
        monitor
            .state_update(&neurons, &inputs, &synapses, 0, 4, 1e-4)
            .unwrap();

        assert_eq!(monitor.counts(GroupId::new(0)).unwrap(), &[1]);
        assert_eq!(monitor.counts(GroupId::new(1)).unwrap(), &[1]);
        // 1 spike in a 1ms bin from 1 neuron = 1000 Hz
        assert_eq!(monitor.rates(GroupId::new(0)).unwrap(), vec![1000.0]);
    }
}
