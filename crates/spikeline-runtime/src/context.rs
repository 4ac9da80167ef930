//! Execution backend selection and tunables
//!
//! The backend set is closed: a parallel backend running one logical worker
//! per neuron or synapse, and a sequential reference backend performing the
//! same operations in index order for testing. Components receive the context
//! at `init_backend` and dispatch their kernels on the selected kind; both
//! kinds accumulate in the same per-postsynaptic-neuron order, so their
//! outputs agree bit for bit.

use crate::error::{Result, SimulatorError};

/// Which execution backend components dispatch their kernels to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Work-per-element kernels over worker tiles
    Parallel,
    /// Sequential reference implementation
    Reference,
}

/// Tunables recognized by every component
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackendConfig {
    /// Worker tile width for per-neuron kernels
    pub threads_per_block_neurons: usize,
    /// Worker tile width for per-synapse work
    pub threads_per_block_synapses: usize,
    /// Store spikes per-timestep in a bit mask instead of last-spike-time only
    pub high_fidelity_spike_storage: bool,
    /// Ring horizon; computed by the engine at finalization
    pub maximum_axonal_delay_in_timesteps: u32,
    /// Optional cap on the aggregation window; the engine uses
    /// `min(minimum_axonal_delay_in_timesteps, limit)`
    pub timestep_grouping_limit: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            threads_per_block_neurons: 512,
            threads_per_block_synapses: 512,
            high_fidelity_spike_storage: false,
            maximum_axonal_delay_in_timesteps: 1,
            timestep_grouping_limit: None,
        }
    }
}

impl BackendConfig {
    /// Validate the tunables
    pub fn validate(&self) -> Result<()> {
        if self.threads_per_block_neurons == 0 {
            return Err(SimulatorError::invalid_parameter(
                "threads_per_block_neurons",
                "0",
                "> 0",
            ));
        }
        if self.threads_per_block_synapses == 0 {
            return Err(SimulatorError::invalid_parameter(
                "threads_per_block_synapses",
                "0",
                "> 0",
            ));
        }
        if self.timestep_grouping_limit == Some(0) {
            return Err(SimulatorError::invalid_parameter(
                "timestep_grouping_limit",
                "0",
                ">= 1",
            ));
        }
        Ok(())
    }
}

/// Execution context handed to every component at `init_backend`
#[derive(Debug, Clone)]
pub struct BackendContext {
    kind: BackendKind,
    /// Tunables shared by every component
    pub config: BackendConfig,
}

impl BackendContext {
    /// Create a context for the given backend kind with default tunables
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            config: BackendConfig::default(),
        }
    }

    /// Create a context with explicit tunables
    pub fn with_config(kind: BackendKind, config: BackendConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { kind, config })
    }

    /// The selected backend kind
    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Neuron kernel tile width
    pub fn neuron_tile(&self) -> usize {
        self.config.threads_per_block_neurons
    }

    /// Synapse kernel tile width
    pub fn synapse_tile(&self) -> usize {
        self.config.threads_per_block_synapses
    }
}

impl Default for BackendContext {
    fn default() -> Self {
        Self::new(BackendKind::Parallel)
    }
}
