//! Ordinary neuron population
//!
//! State is laid out as structure-of-arrays so integration runs as a kernel
//! with one logical worker per neuron. The parallel backend tiles the index
//! space by `threads_per_block_neurons`; the reference backend walks it
//! sequentially. Both consume the per-substep injected drive produced by the
//! previous synapse stage.

use crate::context::{BackendContext, BackendKind};
use crate::error::{Result, SimulatorError};
use crate::synapses::InjectionBuffers;
use spikeline_storage::GroupId;

use super::models::NeuronModel;
use super::spikes::SpikeStore;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Parameters for one neuron group
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NeuronGroupParams {
    /// Group shape: number of rows
    pub rows: u32,
    /// Group shape: number of columns
    pub cols: u32,
    /// Model family and parameter values for every neuron in the group
    pub model: NeuronModel,
}

impl NeuronGroupParams {
    /// A one-dimensional group of `count` neurons
    pub fn row(count: u32, model: NeuronModel) -> Self {
        Self {
            rows: 1,
            cols: count,
            model,
        }
    }
}

#[derive(Debug, Clone)]
struct GroupInfo {
    start: usize,
    count: usize,
    rows: u32,
    cols: u32,
}

/// Family-specific state arrays
#[derive(Debug, Clone)]
enum FamilyState {
    Lif {
        tau_m: Vec<f32>,
        r_m: Vec<f32>,
    },
    ConductanceLif {
        tau_m: Vec<f32>,
        r_m: Vec<f32>,
        tau_exc: Vec<f32>,
        tau_inh: Vec<f32>,
        e_exc: Vec<f32>,
        e_inh: Vec<f32>,
        g_exc: Vec<f32>,
        g_inh: Vec<f32>,
    },
    Izhikevich {
        a: Vec<f32>,
        b: Vec<f32>,
        d: Vec<f32>,
        u: Vec<f32>,
    },
}

impl FamilyState {
    fn matches(&self, model: &NeuronModel) -> bool {
        matches!(
            (self, model),
            (FamilyState::Lif { .. }, NeuronModel::Lif(_))
                | (
                    FamilyState::ConductanceLif { .. },
                    NeuronModel::ConductanceLif(_)
                )
                | (FamilyState::Izhikevich { .. }, NeuronModel::Izhikevich(_))
        )
    }

    fn family_name(&self) -> &'static str {
        match self {
            FamilyState::Lif { .. } => "lif",
            FamilyState::ConductanceLif { .. } => "conductance-lif",
            FamilyState::Izhikevich { .. } => "izhikevich",
        }
    }
}

/// Read-only per-neuron arrays shared by every family kernel
struct CommonRead<'a> {
    v_rest: &'a [f32],
    v_reset: &'a [f32],
    v_thresh: &'a [f32],
    t_refrac: &'a [f32],
    tau_trace: &'a [f32],
    background: &'a [f32],
}

/// Window geometry handed to the kernels
#[derive(Debug, Clone, Copy)]
struct WindowCfg {
    first_step: u64,
    window: u32,
    dt: f32,
    span: u32,
    mask_enabled: bool,
    words: usize,
}

/// An ordered sequence of neurons partitioned into groups
#[derive(Debug)]
pub struct NeuronPopulation {
    groups: Vec<GroupInfo>,
    v: Vec<f32>,
    v_rest: Vec<f32>,
    v_reset: Vec<f32>,
    v_thresh: Vec<f32>,
    t_refrac: Vec<f32>,
    tau_trace: Vec<f32>,
    trace: Vec<f32>,
    background_current: Vec<f32>,
    spikes: SpikeStore,
    family: Option<FamilyState>,
}

impl Default for NeuronPopulation {
    fn default() -> Self {
        Self::new()
    }
}

impl NeuronPopulation {
    /// Create an empty population
    pub fn new() -> Self {
        Self {
            groups: Vec::new(),
            v: Vec::new(),
            v_rest: Vec::new(),
            v_reset: Vec::new(),
            v_thresh: Vec::new(),
            t_refrac: Vec::new(),
            tau_trace: Vec::new(),
            trace: Vec::new(),
            background_current: Vec::new(),
            spikes: SpikeStore::new(),
            family: None,
        }
    }

    /// Add one group of neurons; IDs are consecutive in insertion order
    pub fn add_group(&mut self, params: &NeuronGroupParams) -> Result<GroupId> {
        params.model.validate()?;
        if params.rows == 0 || params.cols == 0 {
            return Err(SimulatorError::shape(format!(
                "neuron group shape {}x{} is empty",
                params.rows, params.cols
            )));
        }
        if let Some(family) = &self.family {
            if !family.matches(&params.model) {
                return Err(SimulatorError::shape(format!(
                    "population holds {} neurons but group params are {}",
                    family.family_name(),
                    params.model.family_name()
                )));
            }
        }

        let count = params.rows as usize * params.cols as usize;
        let start = self.v.len();

        match &params.model {
            NeuronModel::Lif(p) => {
                self.push_common(count, p.v_rest, p.v_rest, p.v_reset, p.v_thresh, p.t_refrac, p.tau_trace);
                let family = self.family.get_or_insert_with(|| FamilyState::Lif {
                    tau_m: Vec::new(),
                    r_m: Vec::new(),
                });
                if let FamilyState::Lif { tau_m, r_m } = family {
                    tau_m.resize(start + count, p.tau_m);
                    r_m.resize(start + count, p.r_m);
                }
            }
            NeuronModel::ConductanceLif(p) => {
                self.push_common(count, p.v_rest, p.v_rest, p.v_reset, p.v_thresh, p.t_refrac, p.tau_trace);
                let family = self
                    .family
                    .get_or_insert_with(|| FamilyState::ConductanceLif {
                        tau_m: Vec::new(),
                        r_m: Vec::new(),
                        tau_exc: Vec::new(),
                        tau_inh: Vec::new(),
                        e_exc: Vec::new(),
                        e_inh: Vec::new(),
                        g_exc: Vec::new(),
                        g_inh: Vec::new(),
                    });
                if let FamilyState::ConductanceLif {
                    tau_m,
                    r_m,
                    tau_exc,
                    tau_inh,
                    e_exc,
                    e_inh,
                    g_exc,
                    g_inh,
                } = family
                {
                    tau_m.resize(start + count, p.tau_m);
                    r_m.resize(start + count, p.r_m);
                    tau_exc.resize(start + count, p.tau_exc);
                    tau_inh.resize(start + count, p.tau_inh);
                    e_exc.resize(start + count, p.e_exc);
                    e_inh.resize(start + count, p.e_inh);
                    g_exc.resize(start + count, 0.0);
                    g_inh.resize(start + count, 0.0);
                }
            }
            NeuronModel::Izhikevich(p) => {
                // v_rest doubles as the initial potential, v_reset as c
                self.push_common(count, p.v_init, p.v_init, p.c, p.v_peak, 0.0, p.tau_trace);
                let family = self.family.get_or_insert_with(|| FamilyState::Izhikevich {
                    a: Vec::new(),
                    b: Vec::new(),
                    d: Vec::new(),
                    u: Vec::new(),
                });
                if let FamilyState::Izhikevich { a, b, d, u } = family {
                    a.resize(start + count, p.a);
                    b.resize(start + count, p.b);
                    d.resize(start + count, p.d);
                    u.resize(start + count, p.b * p.v_init);
                }
            }
        }

        let id = GroupId::new(self.groups.len() as u32);
        self.groups.push(GroupInfo {
            start,
            count,
            rows: params.rows,
            cols: params.cols,
        });
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_common(
        &mut self,
        count: usize,
        v_init: f32,
        v_rest: f32,
        v_reset: f32,
        v_thresh: f32,
        t_refrac: f32,
        tau_trace: f32,
    ) {
        let new_len = self.v.len() + count;
        self.v.resize(new_len, v_init);
        self.v_rest.resize(new_len, v_rest);
        self.v_reset.resize(new_len, v_reset);
        self.v_thresh.resize(new_len, v_thresh);
        self.t_refrac.resize(new_len, t_refrac);
        self.tau_trace.resize(new_len, tau_trace);
        self.trace.resize(new_len, 0.0);
        self.background_current.resize(new_len, 0.0);
        self.spikes.grow(count);
    }

    /// Number of neurons
    pub fn len(&self) -> usize {
        self.v.len()
    }

    /// Whether the population holds no neurons
    pub fn is_empty(&self) -> bool {
        self.v.is_empty()
    }

    /// Number of groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Index range of one group's neurons
    pub fn group_range(&self, group: GroupId) -> Result<core::ops::Range<usize>> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("neuron group {} was never added", group))
        })?;
        Ok(info.start..info.start + info.count)
    }

    /// Shape of one group as (rows, cols)
    pub fn group_shape(&self, group: GroupId) -> Result<(u32, u32)> {
        let info = self.groups.get(group.index()).ok_or_else(|| {
            SimulatorError::shape(format!("neuron group {} was never added", group))
        })?;
        Ok((info.rows, info.cols))
    }

    /// Membrane potentials, one per neuron
    pub fn v(&self) -> &[f32] {
        &self.v
    }

    /// Postsynaptic activity traces, one per neuron
    pub fn trace(&self) -> &[f32] {
        &self.trace
    }

    /// Spike time storage
    pub fn spikes(&self) -> &SpikeStore {
        &self.spikes
    }

    /// Whether the population's family consumes conductance increments
    pub fn receives_conductance(&self) -> bool {
        matches!(self.family, Some(FamilyState::ConductanceLif { .. }))
    }

    /// Name of the population's model family, if any group was added
    pub fn family_name(&self) -> Option<&'static str> {
        self.family.as_ref().map(|f| f.family_name())
    }

    /// Set a constant injected current for every neuron of a group
    pub fn set_background_current(&mut self, group: GroupId, current: f32) -> Result<()> {
        let range = self.group_range(group)?;
        self.background_current[range].fill(current);
        Ok(())
    }

    /// Set per-neuron injected currents for a group
    pub fn set_background_currents(&mut self, group: GroupId, currents: &[f32]) -> Result<()> {
        let range = self.group_range(group)?;
        if currents.len() != range.len() {
            return Err(SimulatorError::shape(format!(
                "group {} holds {} neurons, got {} currents",
                group,
                range.len(),
                currents.len()
            )));
        }
        self.background_current[range].copy_from_slice(currents);
        Ok(())
    }

    /// Size the spike mask for the delivery horizon
    pub fn init_backend(&mut self, ctx: &BackendContext, mask_span: u32) -> Result<()> {
        self.spikes
            .configure_mask(mask_span, ctx.config.high_fidelity_spike_storage);
        Ok(())
    }

    /// Restore every neuron to its initial state
    pub fn reset_state(&mut self) {
        self.v.copy_from_slice(&self.v_rest);
        self.trace.fill(0.0);
        self.spikes.reset();
        match &mut self.family {
            Some(FamilyState::ConductanceLif { g_exc, g_inh, .. }) => {
                g_exc.fill(0.0);
                g_inh.fill(0.0);
            }
            Some(FamilyState::Izhikevich { b, u, .. }) => {
                for (ui, (bi, vi)) in u.iter_mut().zip(b.iter().zip(self.v.iter())) {
                    *ui = bi * vi;
                }
            }
            _ => {}
        }
    }

    /// Integrate one aggregation window of `window` substeps starting at
    /// `first_step`, consuming the injected drive latched by the previous
    /// synapse stage.
    pub fn state_update(
        &mut self,
        inj: &InjectionBuffers,
        ctx: &BackendContext,
        first_step: u64,
        window: u32,
        dt: f32,
    ) {
        if self.v.is_empty() {
            return;
        }
        let cfg = WindowCfg {
            first_step,
            window,
            dt,
            span: self.spikes.span,
            mask_enabled: self.spikes.mask_enabled,
            words: self.spikes.words_per_neuron,
        };
        let read = CommonRead {
            v_rest: &self.v_rest,
            v_reset: &self.v_reset,
            v_thresh: &self.v_thresh,
            t_refrac: &self.t_refrac,
            tau_trace: &self.tau_trace,
            background: &self.background_current,
        };
        let tile = ctx.neuron_tile();
        let kind = ctx.kind();

        let Some(family) = self.family.as_mut() else {
            return;
        };
        match family {
            FamilyState::Lif { tau_m, r_m } => run_lif(
                kind,
                tile,
                &mut self.v,
                &mut self.trace,
                &mut self.spikes.last_spike_time,
                &mut self.spikes.last_spike_step,
                &mut self.spikes.mask,
                tau_m,
                r_m,
                &read,
                inj,
                &cfg,
            ),
            FamilyState::ConductanceLif {
                tau_m,
                r_m,
                tau_exc,
                tau_inh,
                e_exc,
                e_inh,
                g_exc,
                g_inh,
            } => run_conductance(
                kind,
                tile,
                &mut self.v,
                &mut self.trace,
                &mut self.spikes.last_spike_time,
                &mut self.spikes.last_spike_step,
                &mut self.spikes.mask,
                g_exc,
                g_inh,
                tau_m,
                r_m,
                tau_exc,
                tau_inh,
                e_exc,
                e_inh,
                &read,
                inj,
                &cfg,
            ),
            FamilyState::Izhikevich { a, b, d, u } => run_izhikevich(
                kind,
                tile,
                &mut self.v,
                &mut self.trace,
                &mut self.spikes.last_spike_time,
                &mut self.spikes.last_spike_step,
                &mut self.spikes.mask,
                u,
                a,
                b,
                d,
                &read,
                inj,
                &cfg,
            ),
        }
    }
}

/// Latch a spike for local index `k` (global `base + k`) at `step`
#[inline]
#[allow(clippy::too_many_arguments)]
fn latch_spike(
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask_row: &mut [u32],
    k: usize,
    step: u64,
    t: f32,
    cfg: &WindowCfg,
) {
    ls_time[k] = t;
    ls_step[k] = step as i64;
    if cfg.mask_enabled {
        SpikeStore::set_row_bit(mask_row, cfg.span, step);
    }
}

#[allow(clippy::too_many_arguments)]
fn lif_tile(
    base: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    tau_m: &[f32],
    r_m: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    for k in 0..v.len() {
        let i = base + k;
        let mask_row = &mut mask[k * cfg.words..(k + 1) * cfg.words];
        if cfg.mask_enabled {
            SpikeStore::clear_window_row(mask_row, cfg.span, cfg.first_step, cfg.window);
        }
        let trace_decay = (-cfg.dt / read.tau_trace[i]).exp();
        let lam = cfg.dt / tau_m[i];
        let mut vi = v[k];
        let mut tr = trace[k];
        for sub in 0..cfg.window as u64 {
            let step = cfg.first_step + sub;
            let t = step as f32 * cfg.dt;
            tr *= trace_decay;
            let i_in = read.background[i] + inj.exc(i, sub as usize) - inj.inh(i, sub as usize);
            vi += lam * (read.v_rest[i] - vi + r_m[i] * i_in);
            if vi >= read.v_thresh[i] && t - ls_time[k] >= read.t_refrac[i] {
                vi = read.v_reset[i];
                tr += 1.0;
                latch_spike(ls_time, ls_step, mask_row, k, step, t, cfg);
            }
        }
        v[k] = vi;
        trace[k] = tr;
    }
}

#[allow(clippy::too_many_arguments)]
fn conductance_tile(
    base: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    g_exc: &mut [f32],
    g_inh: &mut [f32],
    tau_m: &[f32],
    r_m: &[f32],
    tau_exc: &[f32],
    tau_inh: &[f32],
    e_exc: &[f32],
    e_inh: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    for k in 0..v.len() {
        let i = base + k;
        let mask_row = &mut mask[k * cfg.words..(k + 1) * cfg.words];
        if cfg.mask_enabled {
            SpikeStore::clear_window_row(mask_row, cfg.span, cfg.first_step, cfg.window);
        }
        let trace_decay = (-cfg.dt / read.tau_trace[i]).exp();
        let lam = cfg.dt / tau_m[i];
        let exc_decay = 1.0 - cfg.dt / tau_exc[i];
        let inh_decay = 1.0 - cfg.dt / tau_inh[i];
        let mut vi = v[k];
        let mut tr = trace[k];
        let mut ge = g_exc[k];
        let mut gi = g_inh[k];
        for sub in 0..cfg.window as u64 {
            let step = cfg.first_step + sub;
            let t = step as f32 * cfg.dt;
            tr *= trace_decay;
            ge += inj.exc(i, sub as usize);
            gi += inj.inh(i, sub as usize);
            let syn = ge * (e_exc[i] - vi) + gi * (e_inh[i] - vi);
            vi += lam * (read.v_rest[i] - vi + r_m[i] * (syn + read.background[i]));
            ge *= exc_decay;
            gi *= inh_decay;
            if vi >= read.v_thresh[i] && t - ls_time[k] >= read.t_refrac[i] {
                vi = read.v_reset[i];
                tr += 1.0;
                latch_spike(ls_time, ls_step, mask_row, k, step, t, cfg);
            }
        }
        v[k] = vi;
        trace[k] = tr;
        g_exc[k] = ge;
        g_inh[k] = gi;
    }
}

#[allow(clippy::too_many_arguments)]
fn izhikevich_tile(
    base: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    u: &mut [f32],
    a: &[f32],
    b: &[f32],
    d: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    // Izhikevich dynamics are per millisecond
    let dt_ms = cfg.dt * 1000.0;
    for k in 0..v.len() {
        let i = base + k;
        let mask_row = &mut mask[k * cfg.words..(k + 1) * cfg.words];
        if cfg.mask_enabled {
            SpikeStore::clear_window_row(mask_row, cfg.span, cfg.first_step, cfg.window);
        }
        let trace_decay = (-cfg.dt / read.tau_trace[i]).exp();
        let mut vi = v[k];
        let mut ui = u[k];
        let mut tr = trace[k];
        for sub in 0..cfg.window as u64 {
            let step = cfg.first_step + sub;
            let t = step as f32 * cfg.dt;
            tr *= trace_decay;
            let i_in = read.background[i] + inj.exc(i, sub as usize) - inj.inh(i, sub as usize);
            vi += dt_ms * (0.04 * vi * vi + 5.0 * vi + 140.0 - ui + i_in);
            ui += dt_ms * (a[i] * (b[i] * vi - ui));
            if vi >= read.v_thresh[i] {
                // v_reset holds c
                vi = read.v_reset[i];
                ui += d[i];
                tr += 1.0;
                latch_spike(ls_time, ls_step, mask_row, k, step, t, cfg);
            }
        }
        v[k] = vi;
        u[k] = ui;
        trace[k] = tr;
    }
}

#[allow(clippy::too_many_arguments)]
fn run_lif(
    kind: BackendKind,
    tile: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    tau_m: &[f32],
    r_m: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    #[cfg(feature = "parallel")]
    if kind == BackendKind::Parallel {
        v.par_chunks_mut(tile)
            .zip(trace.par_chunks_mut(tile))
            .zip(ls_time.par_chunks_mut(tile))
            .zip(ls_step.par_chunks_mut(tile))
            .zip(mask.par_chunks_mut(tile * cfg.words))
            .enumerate()
            .for_each(|(ti, ((((v, trace), ls_time), ls_step), mask))| {
                lif_tile(
                    ti * tile,
                    v,
                    trace,
                    ls_time,
                    ls_step,
                    mask,
                    tau_m,
                    r_m,
                    read,
                    inj,
                    cfg,
                )
            });
        return;
    }
    let _ = (kind, tile);
    lif_tile(0, v, trace, ls_time, ls_step, mask, tau_m, r_m, read, inj, cfg);
}

#[allow(clippy::too_many_arguments)]
fn run_conductance(
    kind: BackendKind,
    tile: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    g_exc: &mut [f32],
    g_inh: &mut [f32],
    tau_m: &[f32],
    r_m: &[f32],
    tau_exc: &[f32],
    tau_inh: &[f32],
    e_exc: &[f32],
    e_inh: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    #[cfg(feature = "parallel")]
    if kind == BackendKind::Parallel {
        v.par_chunks_mut(tile)
            .zip(trace.par_chunks_mut(tile))
            .zip(ls_time.par_chunks_mut(tile))
            .zip(ls_step.par_chunks_mut(tile))
            .zip(mask.par_chunks_mut(tile * cfg.words))
            .zip(g_exc.par_chunks_mut(tile))
            .zip(g_inh.par_chunks_mut(tile))
            .enumerate()
            .for_each(
                |(ti, ((((((v, trace), ls_time), ls_step), mask), g_exc), g_inh))| {
                    conductance_tile(
                        ti * tile,
                        v,
                        trace,
                        ls_time,
                        ls_step,
                        mask,
                        g_exc,
                        g_inh,
                        tau_m,
                        r_m,
                        tau_exc,
                        tau_inh,
                        e_exc,
                        e_inh,
                        read,
                        inj,
                        cfg,
                    )
                },
            );
        return;
    }
    let _ = (kind, tile);
    conductance_tile(
        0, v, trace, ls_time, ls_step, mask, g_exc, g_inh, tau_m, r_m, tau_exc, tau_inh, e_exc,
        e_inh, read, inj, cfg,
    );
}

#[allow(clippy::too_many_arguments)]
fn run_izhikevich(
    kind: BackendKind,
    tile: usize,
    v: &mut [f32],
    trace: &mut [f32],
    ls_time: &mut [f32],
    ls_step: &mut [i64],
    mask: &mut [u32],
    u: &mut [f32],
    a: &[f32],
    b: &[f32],
    d: &[f32],
    read: &CommonRead<'_>,
    inj: &InjectionBuffers,
    cfg: &WindowCfg,
) {
    #[cfg(feature = "parallel")]
    if kind == BackendKind::Parallel {
        v.par_chunks_mut(tile)
            .zip(trace.par_chunks_mut(tile))
            .zip(ls_time.par_chunks_mut(tile))
            .zip(ls_step.par_chunks_mut(tile))
            .zip(mask.par_chunks_mut(tile * cfg.words))
            .zip(u.par_chunks_mut(tile))
            .enumerate()
            .for_each(|(ti, (((((v, trace), ls_time), ls_step), mask), u))| {
                izhikevich_tile(
                    ti * tile,
                    v,
                    trace,
                    ls_time,
                    ls_step,
                    mask,
                    u,
                    a,
                    b,
                    d,
                    read,
                    inj,
                    cfg,
                )
            });
        return;
    }
    let _ = (kind, tile);
    izhikevich_tile(0, v, trace, ls_time, ls_step, mask, u, a, b, d, read, inj, cfg);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neurons::models::{IzhikevichParams, LifParams};
    use crate::neurons::NEVER_SPIKED;

    fn lif_group(count: u32) -> NeuronGroupParams {
        NeuronGroupParams::row(count, NeuronModel::Lif(LifParams::default()))
    }

    fn prepared(count: u32) -> NeuronPopulation {
        let mut pop = NeuronPopulation::new();
        pop.add_group(&lif_group(count)).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        pop.init_backend(&ctx, 2).unwrap();
        pop.reset_state();
        pop
    }

    #[test]
    fn test_group_ids_consecutive() {
        let mut pop = NeuronPopulation::new();
        let a = pop.add_group(&lif_group(3)).unwrap();
        let b = pop.add_group(&lif_group(2)).unwrap();
        assert_eq!(a, GroupId::new(0));
        assert_eq!(b, GroupId::new(1));
        assert_eq!(pop.len(), 5);
        assert_eq!(pop.group_range(b).unwrap(), 3..5);
        assert!(pop.group_range(GroupId::new(2)).is_err());
    }

    #[test]
    fn test_family_mismatch_rejected() {
        let mut pop = NeuronPopulation::new();
        pop.add_group(&lif_group(1)).unwrap();
        let izh = NeuronGroupParams::row(1, NeuronModel::Izhikevich(IzhikevichParams::default()));
        assert!(pop.add_group(&izh).is_err());
    }

    #[test]
    fn test_lif_integrates_toward_drive() {
        let mut pop = prepared(1);
        pop.set_background_current(GroupId::new(0), 10.0).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        let inj = InjectionBuffers::empty();
        pop.state_update(&inj, &ctx, 0, 1, 1e-4);

        // One Euler substep: v += dt/tau * (v_rest - v + R*I)
        let expected = -70.0 + (1e-4 / 0.02) * 10.0;
        assert!((pop.v()[0] - expected).abs() < 1e-5);
        assert_eq!(pop.spikes().last_spike_time(0), NEVER_SPIKED);
    }

    #[test]
    fn test_lif_spikes_and_resets() {
        let mut pop = prepared(1);
        // Drive far above threshold so the first substep crosses
        pop.set_background_current(GroupId::new(0), 1.0e7).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        let inj = InjectionBuffers::empty();
        pop.state_update(&inj, &ctx, 0, 1, 1e-4);

        assert_eq!(pop.v()[0], -70.0);
        assert_eq!(pop.spikes().last_spike_step(0), 0);
        assert!(pop.trace()[0] > 0.9);
    }

    #[test]
    fn test_refractory_suppresses_spike() {
        let mut pop = NeuronPopulation::new();
        let params = NeuronGroupParams::row(
            1,
            NeuronModel::Lif(LifParams {
                t_refrac: 1.0,
                ..Default::default()
            }),
        );
        pop.add_group(&params).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        pop.init_backend(&ctx, 2).unwrap();
        pop.reset_state();
        pop.set_background_current(GroupId::new(0), 1.0e7).unwrap();

        let inj = InjectionBuffers::empty();
        pop.state_update(&inj, &ctx, 0, 1, 1e-4);
        assert_eq!(pop.spikes().last_spike_step(0), 0);

        // Still refractory; v keeps integrating but no new spike is latched
        pop.state_update(&inj, &ctx, 1, 1, 1e-4);
        assert_eq!(pop.spikes().last_spike_step(0), 0);
    }

    #[test]
    fn test_reset_state_restores_initial() {
        let mut pop = prepared(2);
        pop.set_background_current(GroupId::new(0), 1.0e7).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        let inj = InjectionBuffers::empty();
        pop.state_update(&inj, &ctx, 0, 1, 1e-4);
        pop.reset_state();

        assert_eq!(pop.v()[0], -70.0);
        assert_eq!(pop.trace()[0], 0.0);
        assert_eq!(pop.spikes().last_spike_time(0), NEVER_SPIKED);
    }

    #[test]
    fn test_izhikevich_spike_reset() {
        let mut pop = NeuronPopulation::new();
        let params =
            NeuronGroupParams::row(1, NeuronModel::Izhikevich(IzhikevichParams::default()));
        pop.add_group(&params).unwrap();
        let ctx = BackendContext::new(BackendKind::Reference);
        pop.init_backend(&ctx, 2).unwrap();
        pop.reset_state();
        pop.set_background_current(GroupId::new(0), 1.0e4).unwrap();

        let inj = InjectionBuffers::empty();
        pop.state_update(&inj, &ctx, 0, 1, 1e-3);
        assert_eq!(pop.spikes().last_spike_step(0), 0);
        assert_eq!(pop.v()[0], -65.0);
    }
}
