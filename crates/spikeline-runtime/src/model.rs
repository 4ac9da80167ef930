//! The root spiking model and its per-step pipeline

use crate::context::BackendContext;
use crate::error::{Result, SimulatorError};
use crate::monitor::ActivityMonitor;
use crate::neurons::{InputGroupParams, InputPopulation, NeuronGroupParams, NeuronPopulation};
use crate::plasticity::PlasticityRule;
use crate::synapses::{
    corrected_presynaptic_id, PresynapticGroup, SynapseBundle, SynapseGroupParams,
};
use spikeline_storage::GroupId;

/// Default integration timestep: 0.1 ms
pub const DEFAULT_TIMESTEP: f32 = 1e-4;

/// A complete model: populations, synapses, plasticity rules, monitors, and
/// the engine that advances them
///
/// The model owns its components; populations start empty, so an
/// unconfigured population is already the stand-in the engine treats as a
/// no-op. Construction order matters in exactly one place: the timestep must
/// be set before any synapse group exists, because delays are converted to
/// whole timesteps when a group is added.
#[derive(Debug)]
pub struct SpikingModel {
    timestep: f32,
    neurons: NeuronPopulation,
    inputs: InputPopulation,
    synapses: SynapseBundle,
    rules: Vec<Box<dyn PlasticityRule>>,
    monitors: Vec<Box<dyn ActivityMonitor>>,
    context: BackendContext,
    current_time_in_timesteps: u64,
    timestep_grouping: u32,
    model_complete: bool,
}

impl Default for SpikingModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SpikingModel {
    /// Create a model with the default backend context
    pub fn new() -> Self {
        Self::with_context(BackendContext::default())
    }

    /// Create a model with an explicit backend context
    pub fn with_context(context: BackendContext) -> Self {
        Self {
            timestep: DEFAULT_TIMESTEP,
            neurons: NeuronPopulation::new(),
            inputs: InputPopulation::new(),
            synapses: SynapseBundle::new(),
            rules: Vec::new(),
            monitors: Vec::new(),
            context,
            current_time_in_timesteps: 0,
            timestep_grouping: 1,
            model_complete: false,
        }
    }

    /// The integration timestep in seconds
    pub fn timestep(&self) -> f32 {
        self.timestep
    }

    /// Set the integration timestep
    ///
    /// Fails once any synapse exists: delays are already frozen in timesteps.
    pub fn set_timestep(&mut self, timestep: f32) -> Result<()> {
        if !self.synapses.is_empty() {
            return Err(SimulatorError::lifecycle(
                "the timestep must be set before creating any synapses",
            ));
        }
        if self.model_complete {
            return Err(SimulatorError::lifecycle(
                "the timestep cannot change after the model is finalized",
            ));
        }
        if !(timestep > 0.0) {
            return Err(SimulatorError::invalid_parameter(
                "timestep",
                timestep.to_string(),
                "> 0.0",
            ));
        }
        self.timestep = timestep;
        Ok(())
    }

    /// Add a group of ordinary neurons
    pub fn add_neuron_group(&mut self, params: &NeuronGroupParams) -> Result<GroupId> {
        self.check_not_complete("add a neuron group")?;
        self.neurons.add_group(params)
    }

    /// Add a group of input neurons
    pub fn add_input_neuron_group(&mut self, params: &InputGroupParams) -> Result<GroupId> {
        self.check_not_complete("add an input neuron group")?;
        self.inputs.add_group(params)
    }

    /// Add a synapse group wiring `pre` onto the neuron group `post`
    pub fn add_synapse_group(
        &mut self,
        pre: PresynapticGroup,
        post: GroupId,
        params: &SynapseGroupParams,
    ) -> Result<GroupId> {
        self.check_not_complete("add a synapse group")?;
        self.synapses.add_group(
            pre,
            post,
            &self.neurons,
            &self.inputs,
            self.timestep,
            params,
        )
    }

    /// Add one synapse group per existing input group, all onto `post`
    pub fn add_synapse_groups_for_neuron_group_and_each_input_group(
        &mut self,
        post: GroupId,
        params: &SynapseGroupParams,
    ) -> Result<Vec<GroupId>> {
        let mut ids = Vec::with_capacity(self.inputs.group_count());
        for g in 0..self.inputs.group_count() {
            let pre = corrected_presynaptic_id(GroupId::new(g as u32), true);
            ids.push(self.add_synapse_group(pre, post, params)?);
        }
        Ok(ids)
    }

    /// Append a plasticity rule; rules run in insertion order
    pub fn add_plasticity_rule(&mut self, rule: Box<dyn PlasticityRule>) -> Result<usize> {
        self.check_not_complete("add a plasticity rule")?;
        self.rules.push(rule);
        Ok(self.rules.len() - 1)
    }

    /// Append an activity monitor; monitors run in insertion order
    pub fn add_activity_monitor(&mut self, monitor: Box<dyn ActivityMonitor>) -> Result<usize> {
        self.check_not_complete("add an activity monitor")?;
        self.monitors.push(monitor);
        Ok(self.monitors.len() - 1)
    }

    fn check_not_complete(&self, what: &str) -> Result<()> {
        if self.model_complete {
            return Err(SimulatorError::lifecycle(format!(
                "cannot {} after the model is finalized",
                what
            )));
        }
        Ok(())
    }

    /// Complete wiring, choose the aggregation window, initialize backends,
    /// and reset state
    ///
    /// Idempotent; `run` and `reset_state` call it implicitly.
    pub fn finalize(&mut self) -> Result<()> {
        if self.model_complete {
            return Ok(());
        }
        self.model_complete = true;

        self.synapses.finalize_delays();
        let min_delay = self.synapses.minimum_axonal_delay_in_timesteps();
        let max_delay = self.synapses.maximum_axonal_delay_in_timesteps();
        self.timestep_grouping = match self.context.config.timestep_grouping_limit {
            Some(limit) => min_delay.min(limit),
            None => min_delay,
        };
        self.context.config.maximum_axonal_delay_in_timesteps = max_delay;

        log::info!(
            "building model: {} input neuron(s), {} neuron(s), {} synapse(s), {} plasticity rule(s), {} monitor(s)",
            self.inputs.len(),
            self.neurons.len(),
            self.synapses.len(),
            self.rules.len(),
            self.monitors.len()
        );
        log::debug!(
            "timestep grouping {} (delays {}..={} steps)",
            self.timestep_grouping,
            min_delay,
            max_delay
        );

        let mask_span = max_delay + self.timestep_grouping;
        self.synapses
            .init_backend(&self.context, self.neurons.len(), self.timestep_grouping)?;
        self.neurons.init_backend(&self.context, mask_span)?;
        self.inputs.init_backend(&self.context, mask_span)?;
        for rule in &mut self.rules {
            rule.init_backend(&self.context)?;
        }
        for monitor in &mut self.monitors {
            monitor.init_backend(&self.context)?;
        }

        self.reset_components()
    }

    /// Force finalization, then reset every component to its initial state
    pub fn reset_state(&mut self) -> Result<()> {
        self.finalize()?;
        self.reset_components()
    }

    fn reset_components(&mut self) -> Result<()> {
        self.current_time_in_timesteps = 0;
        self.synapses.reset_state();
        self.neurons.reset_state();
        self.inputs.reset_state();
        for rule in &mut self.rules {
            rule.reset_state(&self.synapses, &self.neurons, &self.inputs);
        }
        for monitor in &mut self.monitors {
            monitor.reset_state(&self.neurons, &self.inputs, &self.synapses)?;
        }
        Ok(())
    }

    /// One engine iteration over the current aggregation window
    ///
    /// The stage order is contractual: neurons latch their spikes before
    /// plasticity reads them and before the synapse stage propagates them,
    /// and the synapse stage runs last so its injected drive is consumed by
    /// the next integration.
    fn perform_per_step_model_instructions(&mut self) -> Result<()> {
        let step = self.current_time_in_timesteps;
        let window = self.timestep_grouping;
        let dt = self.timestep;

        self.neurons
            .state_update(self.synapses.injections(), &self.context, step, window, dt);
        self.inputs.state_update(&self.context, step, window, dt);
        for rule in &mut self.rules {
            rule.run_plasticity(
                &mut self.synapses,
                &self.neurons,
                &self.inputs,
                &self.context,
                step,
                window,
                dt,
            );
        }
        self.synapses
            .state_update(&self.neurons, &self.inputs, &self.context, step, window, dt);
        for monitor in &mut self.monitors {
            monitor.state_update(&self.neurons, &self.inputs, &self.synapses, step, window, dt)?;
        }

        self.current_time_in_timesteps += window as u64;
        Ok(())
    }

    /// Advance the model by `seconds` of simulated time
    ///
    /// Runs `ceil(seconds / timestep)` timesteps in aggregation-window
    /// blocks, then fires `final_update` on every monitor. May be called
    /// repeatedly; simulated time carries across calls.
    pub fn run(&mut self, seconds: f32) -> Result<()> {
        if !(seconds >= 0.0) {
            return Err(SimulatorError::invalid_parameter(
                "seconds",
                seconds.to_string(),
                ">= 0.0",
            ));
        }
        self.finalize()?;

        // Shave the f32 rounding of seconds/dt so an exact multiple of the
        // timestep never rounds up to an extra step
        let ratio = seconds as f64 / self.timestep as f64;
        let timesteps = (ratio * (1.0 - 1e-6)).ceil() as u64;
        let steps = timesteps.div_ceil(self.timestep_grouping as u64);
        log::info!(
            "running model for {}s ({} timesteps in blocks of {})",
            seconds,
            timesteps,
            self.timestep_grouping
        );

        for _ in 0..steps {
            self.perform_per_step_model_instructions()?;
        }

        let t = self.current_time_in_timesteps as f32 * self.timestep;
        for monitor in &mut self.monitors {
            monitor.final_update(t)?;
        }
        Ok(())
    }

    /// The ordinary neuron population
    pub fn neurons(&self) -> &NeuronPopulation {
        &self.neurons
    }

    /// Mutable access to the ordinary population, e.g. for injected currents
    pub fn neurons_mut(&mut self) -> &mut NeuronPopulation {
        &mut self.neurons
    }

    /// The input population
    pub fn inputs(&self) -> &InputPopulation {
        &self.inputs
    }

    /// Mutable access to the input population, e.g. for rate-map refreshes
    pub fn inputs_mut(&mut self) -> &mut InputPopulation {
        &mut self.inputs
    }

    /// The synapse bundle
    pub fn synapses(&self) -> &SynapseBundle {
        &self.synapses
    }

    /// The backend context
    pub fn context(&self) -> &BackendContext {
        &self.context
    }

    /// One attached monitor, for reading results back
    pub fn monitor(&self, index: usize) -> Option<&dyn ActivityMonitor> {
        self.monitors.get(index).map(|m| m.as_ref())
    }

    /// Elapsed simulated time in timesteps
    pub fn current_time_in_timesteps(&self) -> u64 {
        self.current_time_in_timesteps
    }

    /// Elapsed simulated time in seconds
    pub fn current_time_in_seconds(&self) -> f32 {
        self.current_time_in_timesteps as f32 * self.timestep
    }

    /// The aggregation window selected at finalization
    pub fn timestep_grouping(&self) -> u32 {
        self.timestep_grouping
    }

    /// Whether the model has been finalized
    pub fn is_complete(&self) -> bool {
        self.model_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neurons::{models::LifParams, InputSource, NeuronModel};
    use crate::synapses::{Connectivity, WeightInit};

    fn lif_group(count: u32) -> NeuronGroupParams {
        NeuronGroupParams::row(count, NeuronModel::Lif(LifParams::default()))
    }

    #[test]
    fn test_timestep_frozen_by_synapses() {
        let mut model = SpikingModel::new();
        model.set_timestep(1e-3).unwrap();
        let g = model.add_neuron_group(&lif_group(2)).unwrap();
        model
            .add_synapse_group(
                corrected_presynaptic_id(g, false),
                g,
                &SynapseGroupParams {
                    delay_range: (1e-3, 1e-3),
                    ..Default::default()
                },
            )
            .unwrap();

        let err = model.set_timestep(1e-4).unwrap_err();
        assert!(matches!(err, SimulatorError::Lifecycle { .. }));
    }

    #[test]
    fn test_synapse_group_against_missing_population() {
        let mut model = SpikingModel::new();
        let err = model
            .add_synapse_group(
                corrected_presynaptic_id(GroupId::new(0), false),
                GroupId::new(0),
                &SynapseGroupParams::default(),
            )
            .unwrap_err();
        assert!(matches!(err, SimulatorError::Shape { .. }));
    }

    #[test]
    fn test_finalize_selects_grouping_from_min_delay() {
        let mut model = SpikingModel::new();
        let g = model.add_neuron_group(&lif_group(2)).unwrap();
        model
            .add_synapse_group(
                corrected_presynaptic_id(g, false),
                g,
                &SynapseGroupParams {
                    delay_range: (3e-4, 3e-4),
                    ..Default::default()
                },
            )
            .unwrap();
        model
            .add_synapse_group(
                corrected_presynaptic_id(g, false),
                g,
                &SynapseGroupParams {
                    delay_range: (6e-4, 6e-4),
                    ..Default::default()
                },
            )
            .unwrap();
        model.finalize().unwrap();
        assert_eq!(model.timestep_grouping(), 3);
        assert_eq!(
            model.context().config.maximum_axonal_delay_in_timesteps,
            6
        );
        assert!(model.is_complete());

        // Idempotent
        model.finalize().unwrap();
        assert_eq!(model.timestep_grouping(), 3);
    }

    #[test]
    fn test_grouping_limit_caps_window() {
        let mut ctx = BackendContext::default();
        ctx.config.timestep_grouping_limit = Some(1);
        let mut model = SpikingModel::with_context(ctx);
        let g = model.add_neuron_group(&lif_group(2)).unwrap();
        model
            .add_synapse_group(
                corrected_presynaptic_id(g, false),
                g,
                &SynapseGroupParams {
                    delay_range: (4e-4, 4e-4),
                    ..Default::default()
                },
            )
            .unwrap();
        model.finalize().unwrap();
        assert_eq!(model.timestep_grouping(), 1);
    }

    #[test]
    fn test_additions_rejected_after_finalize() {
        let mut model = SpikingModel::new();
        model.add_neuron_group(&lif_group(1)).unwrap();
        model.finalize().unwrap();
        assert!(model.add_neuron_group(&lif_group(1)).is_err());
        assert!(model
            .add_input_neuron_group(&InputGroupParams::row(
                1,
                InputSource::Poisson { rate: 1.0, seed: 0 }
            ))
            .is_err());
    }

    #[test]
    fn test_empty_model_runs() {
        let mut model = SpikingModel::new();
        model.run(0.01).unwrap();
        assert_eq!(model.current_time_in_timesteps(), 100);
    }

    #[test]
    fn test_time_accumulates_across_runs() {
        let mut model = SpikingModel::new();
        model.add_neuron_group(&lif_group(1)).unwrap();
        model.run(0.001).unwrap();
        model.run(0.001).unwrap();
        assert_eq!(model.current_time_in_timesteps(), 20);

        model.reset_state().unwrap();
        assert_eq!(model.current_time_in_timesteps(), 0);
    }

    #[test]
    fn test_convenience_wires_every_input_group() {
        let mut model = SpikingModel::new();
        let post = model.add_neuron_group(&lif_group(3)).unwrap();
        for _ in 0..2 {
            model
                .add_input_neuron_group(&InputGroupParams::row(
                    3,
                    InputSource::Poisson { rate: 5.0, seed: 1 },
                ))
                .unwrap();
        }
        let ids = model
            .add_synapse_groups_for_neuron_group_and_each_input_group(
                post,
                &SynapseGroupParams {
                    connectivity: Connectivity::OneToOne,
                    weight: WeightInit::Constant(0.5),
                    delay_range: (1e-4, 1e-4),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(model.synapses().group_count(), 2);
        assert_eq!(model.synapses().len(), 6);
    }
}
