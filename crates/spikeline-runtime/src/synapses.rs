//! Synapse bundle and delayed-spike conduction
//!
//! Synapses are stored structure-of-arrays in insertion order. Delivery runs
//! through a dense ring of pending contributions keyed by
//! `(postsynaptic neuron, arrival timestep mod ring length)` with separate
//! excitatory and inhibitory planes split by weight sign. Both the enqueue of
//! fresh spikes and the drain of matured ones walk afferent synapses grouped
//! by postsynaptic neuron, so every contended accumulation becomes a private
//! per-row reduction and the parallel and reference backends agree exactly.
//!
//! The drain executed at step `k` covers arrivals in window `k+1`, filling
//! the per-substep injection buffers the next neuron stage consumes. With
//! delays of at least one timestep this enforces the one-step minimum between
//! spike emission and postsynaptic effect.

use crate::context::BackendContext;
#[cfg(feature = "parallel")]
use crate::context::BackendKind;
use crate::error::{Result, SimulatorError};
use crate::neurons::{InputPopulation, NeuronPopulation};
use spikeline_storage::GroupId;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A presynaptic group reference tagged with the population it lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresynapticGroup {
    /// Group ID within the referenced population
    pub group: GroupId,
    /// Whether the group belongs to the input population
    pub is_input: bool,
}

/// Encode a group ID with the flag selecting the ordinary vs input population
pub fn corrected_presynaptic_id(group: GroupId, is_input: bool) -> PresynapticGroup {
    PresynapticGroup { group, is_input }
}

/// A presynaptic neuron index tagged with its population in the high bit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresynapticNeuronId(u32);

impl PresynapticNeuronId {
    const INPUT_FLAG: u32 = 1 << 31;

    /// Tag a neuron index with its population
    pub fn new(index: u32, is_input: bool) -> Self {
        if is_input {
            Self(index | Self::INPUT_FLAG)
        } else {
            Self(index)
        }
    }

    /// Whether the neuron belongs to the input population
    pub fn is_input(&self) -> bool {
        self.0 & Self::INPUT_FLAG != 0
    }

    /// Index into the owning population's state arrays
    pub fn index(&self) -> usize {
        (self.0 & !Self::INPUT_FLAG) as usize
    }
}

/// Wiring pattern of a synapse group
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Connectivity {
    /// Every presynaptic neuron to every postsynaptic neuron
    AllToAll,
    /// Index-aligned pairs; group sizes must match
    OneToOne,
    /// Each pair connected independently with the given probability
    Random {
        /// Connection probability in [0, 1]
        probability: f32,
    },
}

/// Initial weight assignment
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightInit {
    /// Same weight for every synapse
    Constant(f32),
    /// Uniform draw per synapse
    Uniform {
        /// Lower bound
        lo: f32,
        /// Upper bound
        hi: f32,
    },
}

/// Synaptic transmission family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Kinetics {
    /// Matured contributions inject current directly
    Current,
    /// Matured contributions increment the postsynaptic conductances
    Conductance,
}

/// Parameters for one synapse group
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SynapseGroupParams {
    /// Wiring pattern
    pub connectivity: Connectivity,
    /// Initial weights
    pub weight: WeightInit,
    /// Axonal delay range in seconds; rounds to whole timesteps >= 1
    pub delay_range: (f32, f32),
    /// Transmission family; must match the postsynaptic population's model
    pub kinetics: Kinetics,
    /// Seed for connectivity, weight, and delay draws
    pub seed: u64,
}

impl Default for SynapseGroupParams {
    fn default() -> Self {
        Self {
            connectivity: Connectivity::AllToAll,
            weight: WeightInit::Constant(1.0),
            delay_range: (1e-4, 1e-4),
            kinetics: Kinetics::Current,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct SynapseGroupInfo {
    start: usize,
    count: usize,
    pre: PresynapticGroup,
    post: GroupId,
    kinetics: Kinetics,
}

/// Per-substep injected drive latched for the next neuron stage
///
/// Layout is `[neuron * window + substep]`, one plane per sign.
#[derive(Debug, Default)]
pub struct InjectionBuffers {
    exc: Vec<f32>,
    inh: Vec<f32>,
    window: usize,
}

impl InjectionBuffers {
    /// A zero-capacity buffer delivering no drive
    pub fn empty() -> Self {
        Self::default()
    }

    fn allocate(&mut self, neurons: usize, window: usize) {
        self.window = window;
        self.exc = vec![0.0; neurons * window];
        self.inh = vec![0.0; neurons * window];
    }

    fn clear(&mut self) {
        self.exc.fill(0.0);
        self.inh.fill(0.0);
    }

    /// Excitatory drive for `neuron` at window substep `sub`
    #[inline]
    pub fn exc(&self, neuron: usize, sub: usize) -> f32 {
        if self.window == 0 {
            0.0
        } else {
            self.exc[neuron * self.window + sub]
        }
    }

    /// Inhibitory drive for `neuron` at window substep `sub`
    #[inline]
    pub fn inh(&self, neuron: usize, sub: usize) -> f32 {
        if self.window == 0 {
            0.0
        } else {
            self.inh[neuron * self.window + sub]
        }
    }
}

/// Mutable weights with the read-only wiring they are indexed by
#[derive(Debug)]
pub struct PlasticityView<'a> {
    /// Weights in insertion order
    pub weights: &'a mut [f32],
    /// Tagged presynaptic neuron per synapse
    pub pre: &'a [PresynapticNeuronId],
    /// Postsynaptic neuron index per synapse
    pub post: &'a [u32],
}

/// An ordered sequence of synapses with delayed-spike conduction state
#[derive(Debug, Default)]
pub struct SynapseBundle {
    pre: Vec<PresynapticNeuronId>,
    post: Vec<u32>,
    weights: Vec<f32>,
    delays: Vec<u32>,
    groups: Vec<SynapseGroupInfo>,

    min_delay: u32,
    max_delay: u32,

    // Delivery machinery, built at init_backend
    aff_offsets: Vec<u32>,
    aff_synapses: Vec<u32>,
    ring_exc: Vec<f32>,
    ring_inh: Vec<f32>,
    ring_len: usize,
    inj: InjectionBuffers,
}

impl SynapseBundle {
    /// Create an empty bundle
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one synapse group wiring `pre` onto `post`
    ///
    /// Delays are given in seconds and round to whole timesteps, which is why
    /// the engine freezes the timestep once any synapse exists.
    pub fn add_group(
        &mut self,
        pre: PresynapticGroup,
        post: GroupId,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        dt: f32,
        params: &SynapseGroupParams,
    ) -> Result<GroupId> {
        let pre_range = if pre.is_input {
            inputs.group_range(pre.group)?
        } else {
            neurons.group_range(pre.group)?
        };
        let post_range = neurons.group_range(post)?;

        let (lo_s, hi_s) = params.delay_range;
        if lo_s > hi_s {
            return Err(SimulatorError::invalid_parameter(
                "delay_range",
                format!("({}, {})", lo_s, hi_s),
                "lo <= hi",
            ));
        }
        let delay_lo = (lo_s / dt).round() as i64;
        let delay_hi = (hi_s / dt).round() as i64;
        if delay_lo < 1 {
            return Err(SimulatorError::invalid_parameter(
                "delay_range",
                format!("{}s at dt={}s", lo_s, dt),
                ">= 1 timestep",
            ));
        }
        let (delay_lo, delay_hi) = (delay_lo as u32, delay_hi as u32);

        if let WeightInit::Uniform { lo, hi } = params.weight {
            if lo > hi {
                return Err(SimulatorError::invalid_parameter(
                    "weight",
                    format!("({}, {})", lo, hi),
                    "lo <= hi",
                ));
            }
        }

        let wants_conductance = matches!(params.kinetics, Kinetics::Conductance);
        if wants_conductance != neurons.receives_conductance() {
            return Err(SimulatorError::shape(format!(
                "{:?} kinetics onto a {} population",
                params.kinetics,
                neurons.family_name().unwrap_or("empty")
            )));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let start = self.pre.len();

        let mut push = |this: &mut Self, rng: &mut StdRng, i: usize, j: usize| {
            this.pre
                .push(PresynapticNeuronId::new(i as u32, pre.is_input));
            this.post.push(j as u32);
            let w = match params.weight {
                WeightInit::Constant(w) => w,
                WeightInit::Uniform { lo, hi } => {
                    if lo == hi {
                        lo
                    } else {
                        rng.gen_range(lo..hi)
                    }
                }
            };
            this.weights.push(w);
            let d = if delay_lo == delay_hi {
                delay_lo
            } else {
                rng.gen_range(delay_lo..=delay_hi)
            };
            this.delays.push(d);
        };

        match params.connectivity {
            Connectivity::AllToAll => {
                for i in pre_range.clone() {
                    for j in post_range.clone() {
                        push(self, &mut rng, i, j);
                    }
                }
            }
            Connectivity::OneToOne => {
                if pre_range.len() != post_range.len() {
                    return Err(SimulatorError::shape(format!(
                        "one-to-one wiring needs equal group sizes, got {} and {}",
                        pre_range.len(),
                        post_range.len()
                    )));
                }
                for (i, j) in pre_range.clone().zip(post_range.clone()) {
                    push(self, &mut rng, i, j);
                }
            }
            Connectivity::Random { probability } => {
                if !(0.0..=1.0).contains(&probability) {
                    return Err(SimulatorError::invalid_parameter(
                        "probability",
                        probability.to_string(),
                        "in [0, 1]",
                    ));
                }
                for i in pre_range.clone() {
                    for j in post_range.clone() {
                        if rng.gen::<f32>() < probability {
                            push(self, &mut rng, i, j);
                        }
                    }
                }
            }
        }

        let count = self.pre.len() - start;
        let id = GroupId::new(self.groups.len() as u32);
        self.groups.push(SynapseGroupInfo {
            start,
            count,
            pre,
            post,
            kinetics: params.kinetics,
        });
        log::debug!(
            "synapse group {}: {} synapses, delays {}..={} steps",
            id,
            count,
            delay_lo,
            delay_hi
        );
        Ok(id)
    }

    /// Number of synapses
    pub fn len(&self) -> usize {
        self.pre.len()
    }

    /// Whether the bundle holds no synapses
    pub fn is_empty(&self) -> bool {
        self.pre.is_empty()
    }

    /// Number of synapse groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Index range of one group's synapses
    pub fn group_range(&self, group: GroupId) -> Result<core::ops::Range<usize>> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("synapse group {} was never added", group))
        })?;
        Ok(info.start..info.start + info.count)
    }

    /// Postsynaptic group of one synapse group
    pub fn group_post(&self, group: GroupId) -> Result<GroupId> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("synapse group {} was never added", group))
        })?;
        Ok(info.post)
    }

    /// Transmission family of one synapse group
    pub fn group_kinetics(&self, group: GroupId) -> Result<Kinetics> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("synapse group {} was never added", group))
        })?;
        Ok(info.kinetics)
    }

    /// Tagged presynaptic neuron IDs in insertion order
    pub fn pre_ids(&self) -> &[PresynapticNeuronId] {
        &self.pre
    }

    /// Postsynaptic neuron indices in insertion order
    pub fn post_ids(&self) -> &[u32] {
        &self.post
    }

    /// Weights in insertion order
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    /// Mutable weights, for plasticity rules governing this bundle
    pub fn weights_mut(&mut self) -> &mut [f32] {
        &mut self.weights
    }

    /// Split borrow handed to plasticity rules: mutable weights alongside
    /// the read-only wiring they are indexed by
    pub fn plasticity_view(&mut self) -> PlasticityView<'_> {
        PlasticityView {
            weights: &mut self.weights,
            pre: &self.pre,
            post: &self.post,
        }
    }

    /// Axonal delays in timesteps, insertion order
    pub fn delays(&self) -> &[u32] {
        &self.delays
    }

    /// Smallest axonal delay; 1 when the bundle is empty
    pub fn minimum_axonal_delay_in_timesteps(&self) -> u32 {
        self.min_delay
    }

    /// Largest axonal delay; 1 when the bundle is empty
    pub fn maximum_axonal_delay_in_timesteps(&self) -> u32 {
        self.max_delay
    }

    /// Synapse indices afferent to one postsynaptic neuron
    pub fn afferents(&self, post: usize) -> &[u32] {
        let lo = self.aff_offsets[post] as usize;
        let hi = self.aff_offsets[post + 1] as usize;
        &self.aff_synapses[lo..hi]
    }

    /// Injected drive latched for the next neuron stage
    pub fn injections(&self) -> &InjectionBuffers {
        &self.inj
    }

    /// Compute the delay bounds; they never change afterwards
    pub fn finalize_delays(&mut self) {
        self.min_delay = self.delays.iter().copied().min().unwrap_or(1);
        self.max_delay = self.delays.iter().copied().max().unwrap_or(1);
    }

    /// Build the afferent index and delivery ring
    pub fn init_backend(
        &mut self,
        _ctx: &BackendContext,
        n_post: usize,
        grouping: u32,
    ) -> Result<()> {
        // Counting sort of synapse indices by postsynaptic neuron
        let mut counts = vec![0u32; n_post + 1];
        for &j in &self.post {
            if j as usize >= n_post {
                return Err(SimulatorError::backend(format!(
                    "synapse targets neuron {} outside population of {}",
                    j, n_post
                )));
            }
            counts[j as usize + 1] += 1;
        }
        for p in 0..n_post {
            counts[p + 1] += counts[p];
        }
        let mut cursor = counts.clone();
        let mut aff = vec![0u32; self.post.len()];
        for (s, &j) in self.post.iter().enumerate() {
            let at = cursor[j as usize];
            aff[at as usize] = s as u32;
            cursor[j as usize] += 1;
        }
        self.aff_offsets = counts;
        self.aff_synapses = aff;

        self.ring_len = (self.max_delay + grouping) as usize;
        self.ring_exc = vec![0.0; n_post * self.ring_len];
        self.ring_inh = vec![0.0; n_post * self.ring_len];
        self.inj.allocate(n_post, grouping as usize);
        Ok(())
    }

    /// Clear all pending contributions and latched drive
    pub fn reset_state(&mut self) {
        self.ring_exc.fill(0.0);
        self.ring_inh.fill(0.0);
        self.inj.clear();
    }

    /// Propagate spikes of the just-integrated window and latch the drive
    /// for the next one
    pub fn state_update(
        &mut self,
        neurons: &NeuronPopulation,
        inputs: &InputPopulation,
        ctx: &BackendContext,
        first_step: u64,
        window: u32,
        _dt: f32,
    ) {
        if self.ring_len == 0 {
            return;
        }
        let ring_len = self.ring_len;
        let win = window as usize;
        let Self {
            pre,
            weights,
            delays,
            aff_offsets,
            aff_synapses,
            ring_exc,
            ring_inh,
            inj,
            ..
        } = self;
        let pre: &[PresynapticNeuronId] = pre;
        let weights: &[f32] = weights;
        let delays: &[u32] = delays;
        let aff_offsets: &[u32] = aff_offsets;
        let aff_synapses: &[u32] = aff_synapses;

        let neuron_spikes = neurons.spikes();
        let input_spikes = inputs.spikes();

        let process_row = |p: usize,
                           row_exc: &mut [f32],
                           row_inh: &mut [f32],
                           out_exc: &mut [f32],
                           out_inh: &mut [f32]| {
            let lo = aff_offsets[p] as usize;
            let hi = aff_offsets[p + 1] as usize;
            for &s in &aff_synapses[lo..hi] {
                let s = s as usize;
                let source = pre[s];
                let store = if source.is_input() {
                    input_spikes
                } else {
                    neuron_spikes
                };
                let w = weights[s];
                let d = delays[s] as u64;
                store.visit_window(source.index(), first_step, window, |spike_step| {
                    let slot = ((spike_step + d) % ring_len as u64) as usize;
                    if w >= 0.0 {
                        row_exc[slot] += w;
                    } else {
                        row_inh[slot] -= w;
                    }
                });
            }
            // Drain arrivals for the window the next neuron stage integrates
            for sub in 0..win {
                let arrival = first_step + window as u64 + sub as u64;
                let slot = (arrival % ring_len as u64) as usize;
                out_exc[sub] = row_exc[slot];
                row_exc[slot] = 0.0;
                out_inh[sub] = row_inh[slot];
                row_inh[slot] = 0.0;
            }
        };

        #[cfg(feature = "parallel")]
        if ctx.kind() == BackendKind::Parallel {
            let min_rows = ctx.synapse_tile();
            ring_exc
                .par_chunks_mut(ring_len)
                .zip(ring_inh.par_chunks_mut(ring_len))
                .zip(inj.exc.par_chunks_mut(win))
                .zip(inj.inh.par_chunks_mut(win))
                .with_min_len(min_rows)
                .enumerate()
                .for_each(|(p, (((row_exc, row_inh), out_exc), out_inh))| {
                    process_row(p, row_exc, row_inh, out_exc, out_inh)
                });
            return;
        }
        let _ = ctx.kind();
        for (p, (((row_exc, row_inh), out_exc), out_inh)) in ring_exc
            .chunks_mut(ring_len)
            .zip(ring_inh.chunks_mut(ring_len))
            .zip(inj.exc.chunks_mut(win))
            .zip(inj.inh.chunks_mut(win))
            .enumerate()
        {
            process_row(p, row_exc, row_inh, out_exc, out_inh);
        }
    }
}
