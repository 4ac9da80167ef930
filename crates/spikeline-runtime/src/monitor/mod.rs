//! Activity monitors
//!
//! Monitors observe the model after each synapse stage and buffer samples
//! host-side; bounded buffers flush to their append-only binary sinks when
//! full and drain on `final_update`.

pub mod divergence;
pub mod rate;
pub mod spike;
pub mod weight;

pub use divergence::{DivergenceEvent, DivergenceMonitor};
pub use rate::RateMonitor;
pub use spike::SpikeMonitor;
pub use weight::WeightMonitor;

use crate::context::BackendContext;
use crate::error::Result;
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;

use core::any::Any;

/// Which population a monitor samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulationSelect {
    /// The ordinary neuron population
    Ordinary,
    /// The input population
    Input,
}

/// An observer sampling spike events or continuous observables
pub trait ActivityMonitor: core::fmt::Debug + Any {
    /// Receive the execution context once wiring is complete
    fn init_backend(&mut self, ctx: &BackendContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Clear buffers and capture anything sampled at finalization
    fn reset_state(
        &mut self,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        synapses: &SynapseBundle,
    ) -> Result<()>;

    /// Sample the window `[first_step, first_step + window)`
    #[allow(clippy::too_many_arguments)]
    fn state_update(
        &mut self,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        synapses: &SynapseBundle,
        first_step: u64,
        window: u32,
        dt: f32,
    ) -> Result<()>;

    /// Drain buffers at the end of a run
    fn final_update(&mut self, t: f32) -> Result<()>;

    /// Downcast support for reading results back out of a model
    fn as_any(&self) -> &dyn Any;
}
