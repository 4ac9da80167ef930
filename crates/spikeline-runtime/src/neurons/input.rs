//! Input-driven population
//!
//! Shares the neuron state surface but replaces integration with scheduled
//! spike emission: Poisson processes, replayed spike patterns, and per-neuron
//! rate maps refreshed between stimuli. Emitted spikes land in the same
//! last-spike-time storage ordinary neurons use, so synapse bundles and
//! monitors treat both populations identically.
//!
//! Poisson decisions are drawn from a generator seeded per (stream, neuron,
//! timestep), which makes schedules identical across backends and across
//! aggregation groupings.

use crate::context::BackendContext;
#[cfg(feature = "parallel")]
use crate::context::BackendKind;
use crate::error::{Result, SimulatorError};
use spikeline_storage::GroupId;

use super::spikes::SpikeStore;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Spike source driving one input group
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InputSource {
    /// Homogeneous Poisson process
    Poisson {
        /// Firing rate (Hz)
        rate: f32,
        /// Stream seed
        seed: u64,
    },
    /// Replay of an explicit spike pattern
    PatternReplay {
        /// Ordered (group-local neuron index, time in seconds) pairs
        pattern: Vec<(u32, f32)>,
    },
    /// Per-neuron rates, refreshed between stimuli
    RateMap {
        /// One rate (Hz) per neuron of the group
        rates: Vec<f32>,
        /// Stream seed
        seed: u64,
    },
}

/// Parameters for one input group
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InputGroupParams {
    /// Group shape: number of rows
    pub rows: u32,
    /// Group shape: number of columns
    pub cols: u32,
    /// Spike source
    pub source: InputSource,
}

impl InputGroupParams {
    /// A one-dimensional group of `count` input neurons
    pub fn row(count: u32, source: InputSource) -> Self {
        Self {
            rows: 1,
            cols: count,
            source,
        }
    }
}

#[derive(Debug)]
struct InputGroup {
    start: usize,
    count: usize,
    rows: u32,
    cols: u32,
    source: InputSource,
    /// Replay cursor into the pattern, in emitted-spike order
    cursor: usize,
}

/// Population of externally driven neurons
#[derive(Debug)]
pub struct InputPopulation {
    groups: Vec<InputGroup>,
    spikes: SpikeStore,
}

impl Default for InputPopulation {
    fn default() -> Self {
        Self::new()
    }
}

impl InputPopulation {
    /// Create an empty input population
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            spikes: SpikeStore::new(),
        }
    }

    /// Add one group of input neurons; IDs are consecutive in insertion order
    pub fn add_group(&mut self, params: &InputGroupParams) -> Result<GroupId> {
        if params.rows == 0 || params.cols == 0 {
            return Err(SimulatorError::shape(format!(
                "input group shape {}x{} is empty",
                params.rows, params.cols
            )));
        }
        let count = params.rows as usize * params.cols as usize;
        match &params.source {
            InputSource::Poisson { rate, .. } => {
                if *rate < 0.0 {
                    return Err(SimulatorError::invalid_parameter(
                        "rate",
                        rate.to_string(),
                        ">= 0.0",
                    ));
                }
            }
            InputSource::PatternReplay { pattern } => {
                let mut prev = f32::NEG_INFINITY;
                for &(idx, time) in pattern {
                    if idx as usize >= count {
                        return Err(SimulatorError::shape(format!(
                            "pattern references neuron {} in a group of {}",
                            idx, count
                        )));
                    }
                    if time < prev {
                        return Err(SimulatorError::invalid_parameter(
                            "pattern",
                            format!("time {} after {}", time, prev),
                            "non-decreasing spike times",
                        ));
                    }
                    prev = time;
                }
            }
            InputSource::RateMap { rates, .. } => {
                if rates.len() != count {
                    return Err(SimulatorError::shape(format!(
                        "rate map holds {} entries for a group of {}",
                        rates.len(),
                        count
                    )));
                }
            }
        }

        let start = self.spikes.last_spike_time.len();
        self.spikes.grow(count);
        let id = GroupId::new(self.groups.len() as u32);
        self.groups.push(InputGroup {
            start,
            count,
            rows: params.rows,
            cols: params.cols,
            source: params.source.clone(),
            cursor: 0,
        });
        Ok(id)
    }

    /// Number of input neurons
    pub fn len(&self) -> usize {
        self.spikes.last_spike_time.len()
    }

    /// Whether the population holds no neurons
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Index range of one group's neurons
    pub fn group_range(&self, group: GroupId) -> Result<core::ops::Range<usize>> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("input group {} was never added", group))
        })?;
        Ok(info.start..info.start + info.count)
    }

    /// Shape of one group as (rows, cols)
    pub fn group_shape(&self, group: GroupId) -> Result<(u32, u32)> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("input group {} was never added", group))
        })?;
        Ok((info.rows, info.cols))
    }

    /// Spike time storage
    pub fn spikes(&self) -> &SpikeStore {
        &self.spikes
    }

    /// Replace the rate map of a rate-driven group between stimuli
    pub fn set_rates(&mut self, group: GroupId, rates: &[f32]) -> Result<()> {
        let info = self.groups.get_mut(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("input group {} was never added", group))
        })?;
        match &mut info.source {
            InputSource::RateMap { rates: current, .. } => {
                if rates.len() != info.count {
                    return Err(SimulatorError::shape(format!(
                        "rate map holds {} entries for a group of {}",
                        rates.len(),
                        info.count
                    )));
                }
                current.copy_from_slice(rates);
                Ok(())
            }
            _ => Err(SimulatorError::shape(format!(
                "input group {} is not rate-driven",
                group
            ))),
        }
    }

    /// Size the spike mask for the delivery horizon
    pub fn init_backend(&mut self, ctx: &BackendContext, mask_span: u32) -> Result<()> {
        self.spikes
            .configure_mask(mask_span, ctx.config.high_fidelity_spike_storage);
        Ok(())
    }

    /// Clear spike state and rewind replay cursors
    pub fn reset_state(&mut self) {
        self.spikes.reset();
        for group in &mut self.groups {
            group.cursor = 0;
        }
    }

    /// Emit the spikes scheduled inside `[first_step, first_step + window)`
    pub fn state_update(
        &mut self,
        ctx: &BackendContext,
        first_step: u64,
        window: u32,
        dt: f32,
    ) {
        let cfg = EmitCfg {
            first_step,
            window,
            dt,
            span: self.spikes.span,
            mask_enabled: self.spikes.mask_enabled,
            words: self.spikes.words_per_neuron,
        };
        for group in &mut self.groups {
            let range = group.start..group.start + group.count;
            let words = cfg.words;
            let ls_time = &mut self.spikes.last_spike_time[range.clone()];
            let ls_step = &mut self.spikes.last_spike_step[range.clone()];
            let mask = &mut self.spikes.mask[group.start * words..(group.start + group.count) * words];
            match &group.source {
                InputSource::Poisson { rate, seed } => {
                    let spec = RateSpec::Uniform(*rate);
                    run_poisson(ctx, group.start, ls_time, ls_step, mask, &spec, *seed, &cfg);
                }
                InputSource::RateMap { rates, seed } => {
                    let spec = RateSpec::PerNeuron(rates);
                    run_poisson(ctx, group.start, ls_time, ls_step, mask, &spec, *seed, &cfg);
                }
                InputSource::PatternReplay { pattern } => {
                    if cfg.mask_enabled {
                        for k in 0..group.count {
                            let row = &mut mask[k * words..(k + 1) * words];
                            SpikeStore::clear_window_row(row, cfg.span, first_step, window);
                        }
                    }
                    let end_step = first_step + window as u64;
                    while group.cursor < pattern.len() {
                        let (idx, time) = pattern[group.cursor];
                        let step = (time / dt).round() as u64;
                        if step >= end_step {
                            break;
                        }
                        if step >= first_step {
                            let k = idx as usize;
                            ls_time[k] = step as f32 * dt;
                            ls_step[k] = step as i64;
                            if cfg.mask_enabled {
                                let row = &mut mask[k * words..(k + 1) * words];
                                SpikeStore::set_row_bit(row, cfg.span, step);
                            }
                        }
                        group.cursor += 1;
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct EmitCfg {
    first_step: u64,
    window: u32,
    dt: f32,
    span: u32,
    mask_enabled: bool,
    words: usize,
}

enum RateSpec<'a> {
    Uniform(f32),
    PerNeuron(&'a [f32]),
}

impl RateSpec<'_> {
    #[inline]
    fn rate(&self, local: usize) -> f32 {
        match self {
            RateSpec::Uniform(r) => *r,
            RateSpec::PerNeuron(rates) => rates[local],
        }
    }
}

/// Uniform draw in [0, 1) keyed by (stream, neuron, timestep)
#[inline]
fn window_draw(seed: u64, neuron: u64, step: u64) -> f32 {
    let mixed = seed
        .wrapping_add(neuron.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(step.wrapping_mul(0xD1B5_4A32_D192_ED03));
    let mut rng = SmallRng::seed_from_u64(mixed);
    rng.gen::<f32>()
}

#[allow(clippy::too_many_arguments)]
fn poisson_tile(
    global_base: usize,
    local_base: usize,
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    spec: &RateSpec<'_>,
    seed: u64,
    cfg: &EmitCfg,
) {
    for k in 0..ls_time.len() {
        let neuron = global_base + k;
        let mask_row = &mut mask[k * cfg.words..(k + 1) * cfg.words];
        if cfg.mask_enabled {
            SpikeStore::clear_window_row(mask_row, cfg.span, cfg.first_step, cfg.window);
        }
        let p = spec.rate(local_base + k) * cfg.dt;
        if p <= 0.0 {
            continue;
        }
        for sub in 0..cfg.window as u64 {
            let step = cfg.first_step + sub;
            if window_draw(seed, neuron as u64, step) < p {
                ls_time[k] = step as f32 * cfg.dt;
                ls_step[k] = step as i64;
                if cfg.mask_enabled {
                    SpikeStore::set_row_bit(mask_row, cfg.span, step);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_poisson(
    ctx: &BackendContext,
    group_start: usize,
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    spec: &RateSpec<'_>,
    seed: u64,
    cfg: &EmitCfg,
) {
    #[cfg(feature = "parallel")]
    if ctx.kind() == BackendKind::Parallel {
        let tile = ctx.neuron_tile();
        ls_time
            .par_chunks_mut(tile)
            .zip(ls_step.par_chunks_mut(tile))
            .zip(mask.par_chunks_mut(tile * cfg.words))
            .enumerate()
            .for_each(|(ti, ((ls_time, ls_step), mask))| {
                poisson_tile(
                    group_start + ti * tile,
                    ti * tile,
                    ls_time,
                    ls_step,
                    mask,
                    spec,
                    seed,
                    cfg,
                )
            });
        return;
    }
    let _ = ctx.kind();
    poisson_tile(group_start, 0, ls_time, ls_step, mask, spec, seed, cfg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BackendKind;

    fn ctx() -> BackendContext {
        BackendContext::new(BackendKind::Reference)
    }

    #[test]
    fn test_pattern_replay_fires_at_scheduled_step() {
        let mut pop = InputPopulation::new();
        let params = InputGroupParams::row(
            2,
            InputSource::PatternReplay {
                pattern: vec![(0, 0.0003), (1, 0.0005)],
            },
        );
        pop.add_group(&params).unwrap();
        pop.init_backend(&ctx(), 4).unwrap();
        pop.reset_state();

        pop.state_update(&ctx(), 0, 4, 1e-4);
        assert_eq!(pop.spikes().last_spike_step(0), 3);
        assert_eq!(pop.spikes().last_spike_step(1), -1);

        pop.state_update(&ctx(), 4, 4, 1e-4);
        assert_eq!(pop.spikes().last_spike_step(1), 5);
    }

    #[test]
    fn test_pattern_must_be_ordered() {
        let mut pop = InputPopulation::new();
        let params = InputGroupParams::row(
            2,
            InputSource::PatternReplay {
                pattern: vec![(0, 0.002), (1, 0.001)],
            },
        );
        assert!(pop.add_group(&params).is_err());
    }

    #[test]
    fn test_pattern_rejects_out_of_range_index() {
        let mut pop = InputPopulation::new();
        let params = InputGroupParams::row(
            2,
            InputSource::PatternReplay {
                pattern: vec![(5, 0.001)],
            },
        );
        assert!(pop.add_group(&params).is_err());
    }

    #[test]
    fn test_poisson_determinism_across_groupings() {
        let source = InputSource::Poisson {
            rate: 200.0,
            seed: 7,
        };
        let mut a = InputPopulation::new();
        a.add_group(&InputGroupParams::row(16, source.clone()))
            .unwrap();
        a.init_backend(&ctx(), 8).unwrap();
        a.reset_state();

        let mut b = InputPopulation::new();
        b.add_group(&InputGroupParams::row(16, source)).unwrap();
        b.init_backend(&ctx(), 8).unwrap();
        b.reset_state();

        // One window of 8 substeps vs eight windows of 1
        a.state_update(&ctx(), 0, 8, 1e-3);
        for step in 0..8 {
            b.state_update(&ctx(), step, 1, 1e-3);
        }
        for i in 0..16 {
            assert_eq!(
                a.spikes().last_spike_step(i),
                b.spikes().last_spike_step(i)
            );
        }
    }

    #[test]
    fn test_rate_map_refresh() {
        let mut pop = InputPopulation::new();
        let params = InputGroupParams::row(
            3,
            InputSource::RateMap {
                rates: vec![0.0, 0.0, 0.0],
                seed: 1,
            },
        );
        let g = pop.add_group(&params).unwrap();
        pop.init_backend(&ctx(), 4).unwrap();
        pop.reset_state();

        // All-zero rates emit nothing
        pop.state_update(&ctx(), 0, 4, 1e-3);
        assert_eq!(pop.spikes().last_spike_step(0), -1);

        // A saturating rate fires every neuron
        pop.set_rates(g, &[2000.0, 2000.0, 2000.0]).unwrap();
        pop.state_update(&ctx(), 4, 4, 1e-3);
        for i in 0..3 {
            assert!(pop.spikes().last_spike_step(i) >= 4);
        }
        assert!(pop.set_rates(g, &[1.0]).is_err());
    }
}
