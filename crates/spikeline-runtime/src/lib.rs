//! Simulation engine for the spikeline spiking neural network simulator
//!
//! A model is assembled from populations of neurons (ordinary and
//! input-driven), a bundle of synapses connecting them, plasticity rules that
//! mutate synaptic weights, and activity monitors that record observables.
//! The engine advances the model by a fixed timestep in aggregation-window
//! blocks sized by the smallest axonal delay, driving a fixed per-step
//! pipeline: neuron integration, input spike emission, plasticity, delayed
//! synaptic conduction, monitoring.
//!
//! Every component dispatches its kernels through a [`BackendContext`]: the
//! parallel backend runs one logical worker per neuron or synapse, the
//! reference backend performs the same operations sequentially, and the two
//! agree exactly.
//!
//! ```no_run
//! use spikeline_runtime::{
//!     InputGroupParams, InputSource, LifParams, NeuronGroupParams, NeuronModel, SpikingModel,
//!     SynapseGroupParams, WeightInit,
//! };
//! use spikeline_runtime::corrected_presynaptic_id;
//!
//! # fn main() -> spikeline_runtime::Result<()> {
//! let mut model = SpikingModel::new();
//! model.set_timestep(1e-4)?;
//! let pool = model.add_neuron_group(&NeuronGroupParams::row(
//!     100,
//!     NeuronModel::Lif(LifParams::default()),
//! ))?;
//! let stimulus = model.add_input_neuron_group(&InputGroupParams::row(
//!     100,
//!     InputSource::Poisson { rate: 20.0, seed: 7 },
//! ))?;
//! model.add_synapse_group(
//!     corrected_presynaptic_id(stimulus, true),
//!     pool,
//!     &SynapseGroupParams {
//!         weight: WeightInit::Constant(2.0),
//!         delay_range: (1e-4, 5e-4),
//!         ..Default::default()
//!     },
//! )?;
//! model.run(1.0)?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export the storage-layer types the engine surfaces
pub use spikeline_storage::{
    GroupId, NeuronId, SpikeLogReader, SpikeLogWriter, SpikeRecord, StorageError,
    WeightSnapshotReader, WeightSnapshotWriter,
};

pub mod context;
pub mod error;
pub mod model;
pub mod monitor;
pub mod neurons;
pub mod plasticity;
pub mod synapses;

pub use context::{BackendConfig, BackendContext, BackendKind};
pub use error::{Result, SimulatorError};
pub use model::{SpikingModel, DEFAULT_TIMESTEP};
pub use monitor::{
    ActivityMonitor, DivergenceEvent, DivergenceMonitor, PopulationSelect, RateMonitor,
    SpikeMonitor, WeightMonitor,
};
pub use neurons::{
    ConductanceLifParams, InputGroupParams, InputPopulation, InputSource, IzhikevichParams,
    LifParams, NeuronGroupParams, NeuronModel, NeuronPopulation,
};
pub use plasticity::{PairStdp, PlasticityRule, StdpParams, WeightNormParams, WeightNormalization};
pub use synapses::{
    corrected_presynaptic_id, Connectivity, InjectionBuffers, Kinetics, PresynapticGroup,
    PresynapticNeuronId, SynapseBundle, SynapseGroupParams, WeightInit,
};
