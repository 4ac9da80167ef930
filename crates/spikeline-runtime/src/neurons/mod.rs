//! Neuron populations and their model families

pub mod input;
pub mod models;
pub mod population;
mod spikes;

pub use input::{InputGroupParams, InputPopulation, InputSource};
pub use models::{ConductanceLifParams, IzhikevichParams, LifParams, NeuronModel};
pub use population::{NeuronGroupParams, NeuronPopulation};
pub use spikes::SpikeStore;

/// Sentinel spike time for a neuron that has never fired
pub const NEVER_SPIKED: f32 = f32::NEG_INFINITY;

/// Sentinel spike step for a neuron that has never fired
pub const NEVER_SPIKED_STEP: i64 = -1;
