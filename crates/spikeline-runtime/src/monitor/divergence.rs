//! Numerical divergence monitor

use crate::error::Result;
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;
use spikeline_storage::NeuronId;

use super::ActivityMonitor;

/// One detected non-finite membrane potential
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergenceEvent {
    /// Simulated time of the scan that caught the value
    pub time_s: f32,
    /// Diverged neuron
    pub neuron_id: NeuronId,
}

/// Detects NaN or infinite membrane potentials
///
/// Divergence is a soft condition: the event is recorded and logged, and the
/// engine keeps running unless the caller decides otherwise.
#[derive(Debug, Default)]
pub struct DivergenceMonitor {
    events: Vec<DivergenceEvent>,
    warned: bool,
}

impl DivergenceMonitor {
    /// Create a monitor with an empty event list
    pub fn new() -> Self {
        Self::default()
    }

    /// Detected events in scan order
    pub fn events(&self) -> &[DivergenceEvent] {
        &self.events
    }

    /// Whether any divergence was detected since the last reset
    pub fn diverged(&self) -> bool {
        !self.events.is_empty()
    }
}

impl ActivityMonitor for DivergenceMonitor {
    fn reset_state(
        &mut self,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        _synapses: &SynapseBundle,
    ) -> Result<()> {
        self.events.clear();
        self.warned = false;
        Ok(())
    }

    fn state_update(
        &mut self,
        neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        _synapses: &SynapseBundle,
        first_step: u64,
        window: u32,
        dt: f32,
    ) -> Result<()> {
        let time_s = (first_step + window as u64) as f32 * dt;
        for (i, v) in neurons.v().iter().enumerate() {
            if !v.is_finite() {
                if !self.warned {
                    log::warn!("membrane potential diverged at neuron {} (t={}s)", i, time_s);
                    self.warned = true;
                }
                self.events.push(DivergenceEvent {
                    time_s,
                    neuron_id: NeuronId::new(i as u32),
                });
            }
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
