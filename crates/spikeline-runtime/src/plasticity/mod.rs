//! Plasticity rules
//!
//! Rules observe spike times and weights between the neuron and synapse
//! stages of each engine step and mutate weights in their governed synapse
//! groups. A rule never allocates neurons or synapses.

pub mod stdp;
pub mod weight_norm;

pub use stdp::{PairStdp, StdpParams};
pub use weight_norm::{WeightNormParams, WeightNormalization};

use crate::context::BackendContext;
use crate::error::Result;
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;

/// A rule that mutates synaptic weights between state updates
pub trait PlasticityRule: core::fmt::Debug {
    /// Receive the execution context once wiring is complete
    fn init_backend(&mut self, ctx: &BackendContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Capture baselines and clear rule-private traces
    fn reset_state(
        &mut self,
        synapses: &SynapseBundle,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
    );

    /// Apply one aggregation window's weight updates
    ///
    /// Runs after both populations latched their spikes for
    /// `[first_step, first_step + window)` and before the synapse stage
    /// propagates them. May write weights only in the governed groups.
    #[allow(clippy::too_many_arguments)]
    fn run_plasticity(
        &mut self,
        synapses: &mut SynapseBundle,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        ctx: &BackendContext,
        first_step: u64,
        window: u32,
        dt: f32,
    );
}
