//! Pair-based additive STDP

use crate::context::BackendContext;
#[cfg(feature = "parallel")]
use crate::context::BackendKind;
use crate::error::{Result, SimulatorError};
use crate::neurons::{InputPopulation, NeuronPopulation, SpikeStore};
use crate::synapses::{PresynapticNeuronId, SynapseBundle};
use spikeline_storage::GroupId;

use super::PlasticityRule;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Parameters for pair-based additive STDP
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StdpParams {
    /// Potentiation amplitude per pairing
    pub a_plus: f32,
    /// Depression amplitude per pairing
    pub a_minus: f32,
    /// Potentiation time constant (s)
    pub tau_plus: f32,
    /// Depression time constant (s)
    pub tau_minus: f32,
    /// Lower weight bound
    pub w_min: f32,
    /// Upper weight bound
    pub w_max: f32,
}

impl Default for StdpParams {
    fn default() -> Self {
        Self {
            a_plus: 0.01,
            a_minus: 0.012,
            tau_plus: 0.02,
            tau_minus: 0.02,
            w_min: 0.0,
            w_max: 1.0,
        }
    }
}

impl StdpParams {
    /// Validate the parameter record
    pub fn validate(&self) -> Result<()> {
        if self.a_plus <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "a_plus",
                self.a_plus.to_string(),
                "> 0.0",
            ));
        }
        if self.a_minus <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "a_minus",
                self.a_minus.to_string(),
                "> 0.0",
            ));
        }
        if self.tau_plus <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_plus",
                self.tau_plus.to_string(),
                "> 0.0",
            ));
        }
        if self.tau_minus <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_minus",
                self.tau_minus.to_string(),
                "> 0.0",
            ));
        }
        if self.w_max <= self.w_min {
            return Err(SimulatorError::invalid_parameter(
                "w_max",
                format!("{} (with w_min={})", self.w_max, self.w_min),
                "> w_min",
            ));
        }
        Ok(())
    }
}

/// Pair-based additive STDP over a set of governed synapse groups
///
/// On a postsynaptic spike each afferent synapse is potentiated by
/// `A+ * exp(-(t_post - t_pre) / tau+)` up to `w_max`; on a presynaptic
/// spike it is depressed by `A- * exp(-(t_pre - t_post) / tau-)` down to
/// `w_min`. Spike times are the recorded last-spike-times, so pairings keep
/// their substep resolution inside an aggregation window.
#[derive(Debug)]
pub struct PairStdp {
    params: StdpParams,
    governed: Option<Vec<GroupId>>,
}

impl PairStdp {
    /// Create a rule governing every synapse group
    pub fn new(params: StdpParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            governed: None,
        })
    }

    /// Restrict the rule to the given synapse groups
    pub fn governing(mut self, groups: Vec<GroupId>) -> Self {
        self.governed = Some(groups);
        self
    }

    /// The rule's parameters
    pub fn params(&self) -> &StdpParams {
        &self.params
    }

    fn governed_ranges(&self, synapses: &SynapseBundle) -> Vec<core::ops::Range<usize>> {
        match &self.governed {
            None => {
                if synapses.is_empty() {
                    Vec::new()
                } else {
                    vec![0..synapses.len()]
                }
            }
            Some(groups) => groups
                .iter()
                .filter_map(|g| synapses.group_range(*g).ok())
                .collect(),
        }
    }
}

/// One synapse's pair update; shared by both backends
#[inline]
#[allow(clippy::too_many_arguments)]
fn pair_update(
    w: f32,
    source: PresynapticNeuronId,
    post: usize,
    neuron_spikes: &SpikeStore,
    input_spikes: &SpikeStore,
    params: &StdpParams,
    first_step: u64,
    window: u32,
) -> f32 {
    let pre_store = if source.is_input() {
        input_spikes
    } else {
        neuron_spikes
    };
    let t_pre = pre_store.last_spike_time(source.index());
    let t_post = neuron_spikes.last_spike_time(post);
    let mut w = w;

    if neuron_spikes.spiked_in_window(post, first_step, window) && t_pre.is_finite() && t_post >= t_pre
    {
        w += params.a_plus * (-(t_post - t_pre) / params.tau_plus).exp();
        w = w.min(params.w_max);
    }
    if pre_store.spiked_in_window(source.index(), first_step, window)
        && t_post.is_finite()
        && t_pre >= t_post
    {
        w -= params.a_minus * (-(t_pre - t_post) / params.tau_minus).exp();
        w = w.max(params.w_min);
    }
    w
}

impl PlasticityRule for PairStdp {
    fn reset_state(
        &mut self,
        _synapses: &SynapseBundle,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
    ) {
        // Pairings read recorded spike times; no private traces to clear
    }

    fn run_plasticity(
        &mut self,
        synapses: &mut SynapseBundle,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        ctx: &BackendContext,
        first_step: u64,
        window: u32,
        _dt: f32,
    ) {
        let ranges = self.governed_ranges(synapses);
        let params = &self.params;
        let neuron_spikes = neurons.spikes();
        let input_spikes = inputs.spikes();
        let view = synapses.plasticity_view();

        for range in ranges {
            let pre = &view.pre[range.clone()];
            let post = &view.post[range.clone()];
            let weights = &mut view.weights[range];

            #[cfg(feature = "parallel")]
            if ctx.kind() == BackendKind::Parallel {
                let tile = ctx.synapse_tile();
                weights
                    .par_iter_mut()
                    .with_min_len(tile)
                    .enumerate()
                    .for_each(|(k, w)| {
                        *w = pair_update(
                            *w,
                            pre[k],
                            post[k] as usize,
                            neuron_spikes,
                            input_spikes,
                            params,
                            first_step,
                            window,
                        );
                    });
                continue;
            }
            let _ = ctx.kind();
            for (k, w) in weights.iter_mut().enumerate() {
                *w = pair_update(
                    *w,
                    pre[k],
                    post[k] as usize,
                    neuron_spikes,
                    input_spikes,
                    params,
                    first_step,
                    window,
                );
            }
        }
    }
}
