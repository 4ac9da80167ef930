//! Weight normalization
//!
//! Between state updates, the afferent weights of every postsynaptic neuron
//! are rescaled so their sum matches a per-neuron target: either the total
//! measured right after finalization, or a fixed value.

use crate::context::BackendContext;
use crate::error::{Result, SimulatorError};
use crate::neurons::{InputPopulation, NeuronPopulation};
use crate::synapses::SynapseBundle;
use spikeline_storage::GroupId;

use super::PlasticityRule;

/// Parameters for weight normalization
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeightNormParams {
    /// Normalize to `target` instead of the totals captured at finalization
    pub settarget: bool,
    /// Fixed per-neuron afferent total, used when `settarget` is true
    pub target: f32,
}

impl Default for WeightNormParams {
    fn default() -> Self {
        Self {
            settarget: false,
            target: 0.0,
        }
    }
}

impl WeightNormParams {
    /// Validate the parameter record
    pub fn validate(&self) -> Result<()> {
        if self.settarget && self.target <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "target",
                self.target.to_string(),
                "> 0.0 when settarget is set",
            ));
        }
        Ok(())
    }
}

/// Rescales per-neuron afferent weight totals back to their baseline
#[derive(Debug)]
pub struct WeightNormalization {
    params: WeightNormParams,
    governed: Option<Vec<GroupId>>,
    /// Per postsynaptic neuron: the total afferent weight to preserve
    totals: Vec<f32>,
}

impl WeightNormalization {
    /// Create a rule governing every synapse group
    pub fn new(params: WeightNormParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            governed: None,
            totals: Vec::new(),
        })
    }

    /// Restrict the rule to the given synapse groups
    pub fn governing(mut self, groups: Vec<GroupId>) -> Self {
        self.governed = Some(groups);
        self
    }

    /// The totals the rule preserves, one per postsynaptic neuron
    pub fn totals(&self) -> &[f32] {
        &self.totals
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

impl PlasticityRule for WeightNormalization {
    fn reset_state(
        &mut self,
        synapses: &SynapseBundle,
        neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
    ) {
        let mut totals = vec![0.0f32; neurons.len()];
        let mut counts = vec![0u32; neurons.len()];
        let post = synapses.post_ids();
        let weights = synapses.weights();
        for range in self.governed_ranges(synapses) {
            for s in range {
                totals[post[s] as usize] += weights[s];
                counts[post[s] as usize] += 1;
            }
        }
        if self.params.settarget {
            for (total, count) in totals.iter_mut().zip(counts.iter()) {
                *total = if *count > 0 { self.params.target } else { 0.0 };
            }
        }
        self.totals = totals;
    }

    fn run_plasticity(
        &mut self,
        synapses: &mut SynapseBundle,
        _neurons: &NeuronPopulation,
        _inputs: &InputPopulation,
        _ctx: &BackendContext,
        _first_step: u64,
        _window: u32,
        _dt: f32,
    ) {
        if self.totals.is_empty() {
            return;
        }
        let ranges = self.governed_ranges(synapses);
        let view = synapses.plasticity_view();

        // Accumulated weight changes since the last boundary, per post neuron
        let mut sums = vec![0.0f32; self.totals.len()];
        for range in ranges.clone() {
            for s in range {
                sums[view.post[s] as usize] += view.weights[s];
            }
        }
        for range in ranges {
            for s in range {
                let j = view.post[s] as usize;
                if sums[j].abs() > 1e-12 && self.totals[j] != 0.0 {
                    view.weights[s] *= self.totals[j] / sums[j];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BackendContext, BackendKind};
    use crate::neurons::{models::LifParams, NeuronGroupParams, NeuronModel};
    use crate::synapses::{
        corrected_presynaptic_id, Connectivity, SynapseGroupParams, WeightInit,
    };

    fn fixture() -> (NeuronPopulation, InputPopulation, SynapseBundle) {
        let mut neurons = NeuronPopulation::new();
        neurons
            .add_group(&NeuronGroupParams::row(
                4,
                NeuronModel::Lif(LifParams::default()),
            ))
            .unwrap();
        let inputs = InputPopulation::new();
        let mut bundle = SynapseBundle::new();
        let params = SynapseGroupParams {
            connectivity: Connectivity::AllToAll,
            weight: WeightInit::Uniform { lo: 0.1, hi: 0.9 },
            delay_range: (1e-4, 1e-4),
            seed: 5,
            ..Default::default()
        };
        let pre = corrected_presynaptic_id(GroupId::new(0), false);
        bundle
            .add_group(pre, GroupId::new(0), &neurons, &inputs, 1e-4, &params)
            .unwrap();
        (neurons, inputs, bundle)
    }

    #[test]
    fn test_target_param_validation() {
        assert!(WeightNormParams::default().validate().is_ok());
        let bad = WeightNormParams {
            settarget: true,
            target: 0.0,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_preserves_initial_totals() {
        let (neurons, inputs, mut bundle) = fixture();
        let mut rule = WeightNormalization::new(WeightNormParams::default()).unwrap();
        rule.reset_state(&bundle, &neurons, &inputs);
        let baseline = rule.totals().to_vec();

        // Perturb the weights, then normalize
        for w in bundle.weights_mut() {
            *w *= 1.7;
        }
        let ctx = BackendContext::new(BackendKind::Reference);
        rule.run_plasticity(&mut bundle, &neurons, &inputs, &ctx, 0, 1, 1e-4);

        for j in 0..neurons.len() {
            let sum: f32 = bundle
                .post_ids()
                .iter()
                .zip(bundle.weights())
                .filter(|(p, _)| **p as usize == j)
                .map(|(_, w)| *w)
                .sum();
            assert!((sum - baseline[j]).abs() / baseline[j] < 1e-5);
        }
    }

    #[test]
    fn test_fixed_target() {
        let (neurons, inputs, mut bundle) = fixture();
        let mut rule = WeightNormalization::new(WeightNormParams {
            settarget: true,
            target: 2.0,
        })
        .unwrap();
        rule.reset_state(&bundle, &neurons, &inputs);

        let ctx = BackendContext::new(BackendKind::Reference);
        rule.run_plasticity(&mut bundle, &neurons, &inputs, &ctx, 0, 1, 1e-4);

        for j in 0..neurons.len() {
            let sum: f32 = bundle
                .post_ids()
                .iter()
                .zip(bundle.weights())
                .filter(|(p, _)| **p as usize == j)
                .map(|(_, w)| *w)
                .sum();
            assert!((sum - 2.0).abs() < 1e-5);
        }
    }
}
