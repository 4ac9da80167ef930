//! Neuron model families and their parameter records
//!
//! Membrane potentials are in millivolts, times in seconds. A population
//! holds neurons of exactly one family; groups within it may carry different
//! parameter values.

use crate::error::{Result, SimulatorError};

/// Parameters for current-based leaky integrate-and-fire neurons
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LifParams {
    /// Membrane time constant (s)
    pub tau_m: f32,
    /// Membrane resistance (drive scale)
    pub r_m: f32,
    /// Resting potential (mV)
    pub v_rest: f32,
    /// Reset potential (mV)
    pub v_reset: f32,
    /// Spike threshold (mV)
    pub v_thresh: f32,
    /// Refractory period (s)
    pub t_refrac: f32,
    /// Postsynaptic activity trace decay constant (s)
    pub tau_trace: f32,
}

impl Default for LifParams {
    fn default() -> Self {
        Self {
            tau_m: 0.02,
            r_m: 1.0,
            v_rest: -70.0,
            v_reset: -70.0,
            v_thresh: -50.0,
            t_refrac: 0.002,
            tau_trace: 0.02,
        }
    }
}

impl LifParams {
    /// Validate the parameter record
    pub fn validate(&self) -> Result<()> {
        if self.tau_m <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_m",
                self.tau_m.to_string(),
                "> 0.0",
            ));
        }
        if self.r_m <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "r_m",
                self.r_m.to_string(),
                "> 0.0",
            ));
        }
        if self.v_thresh <= self.v_rest {
            return Err(SimulatorError::invalid_parameter(
                "v_thresh",
                format!("{} (with v_rest={})", self.v_thresh, self.v_rest),
                "> v_rest",
            ));
        }
        if self.t_refrac < 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "t_refrac",
                self.t_refrac.to_string(),
                ">= 0.0",
            ));
        }
        if self.tau_trace <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_trace",
                self.tau_trace.to_string(),
                "> 0.0",
            ));
        }
        Ok(())
    }
}

/// Parameters for conductance-based leaky integrate-and-fire neurons
///
/// Synaptic drive arrives as conductance increments split by sign into the
/// excitatory and inhibitory channels, each decaying with its own time
/// constant toward its reversal potential.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConductanceLifParams {
    /// Membrane time constant (s)
    pub tau_m: f32,
    /// Membrane resistance (drive scale)
    pub r_m: f32,
    /// Resting potential (mV)
    pub v_rest: f32,
    /// Reset potential (mV)
    pub v_reset: f32,
    /// Spike threshold (mV)
    pub v_thresh: f32,
    /// Refractory period (s)
    pub t_refrac: f32,
    /// Postsynaptic activity trace decay constant (s)
    pub tau_trace: f32,
    /// Excitatory conductance decay constant (s)
    pub tau_exc: f32,
    /// Inhibitory conductance decay constant (s)
    pub tau_inh: f32,
    /// Excitatory reversal potential (mV)
    pub e_exc: f32,
    /// Inhibitory reversal potential (mV)
    pub e_inh: f32,
}

impl Default for ConductanceLifParams {
    fn default() -> Self {
        Self {
            tau_m: 0.02,
            r_m: 1.0,
            v_rest: -70.0,
            v_reset: -70.0,
            v_thresh: -50.0,
            t_refrac: 0.002,
            tau_trace: 0.02,
            tau_exc: 0.005,
            tau_inh: 0.01,
            e_exc: 0.0,
            e_inh: -80.0,
        }
    }
}

impl ConductanceLifParams {
    /// Validate the parameter record
    pub fn validate(&self) -> Result<()> {
        let base = LifParams {
            tau_m: self.tau_m,
            r_m: self.r_m,
            v_rest: self.v_rest,
            v_reset: self.v_reset,
            v_thresh: self.v_thresh,
            t_refrac: self.t_refrac,
            tau_trace: self.tau_trace,
        };
        base.validate()?;
        if self.tau_exc <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_exc",
                self.tau_exc.to_string(),
                "> 0.0",
            ));
        }
        if self.tau_inh <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_inh",
                self.tau_inh.to_string(),
                "> 0.0",
            ));
        }
        Ok(())
    }
}

/// Parameters for Izhikevich neurons
///
/// The quadratic dynamics are expressed per millisecond, as the model's
/// constants assume; the integrator converts from the engine timestep.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IzhikevichParams {
    /// Recovery time scale
    pub a: f32,
    /// Recovery sensitivity to v
    pub b: f32,
    /// After-spike reset value of v (mV)
    pub c: f32,
    /// After-spike recovery increment
    pub d: f32,
    /// Spike cutoff (mV)
    pub v_peak: f32,
    /// Initial membrane potential (mV)
    pub v_init: f32,
    /// Postsynaptic activity trace decay constant (s)
    pub tau_trace: f32,
}

impl Default for IzhikevichParams {
    fn default() -> Self {
        // Regular-spiking cortical cell
        Self {
            a: 0.02,
            b: 0.2,
            c: -65.0,
            d: 8.0,
            v_peak: 30.0,
            v_init: -65.0,
            tau_trace: 0.02,
        }
    }
}

impl IzhikevichParams {
    /// Validate the parameter record
    pub fn validate(&self) -> Result<()> {
        if self.a <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "a",
                self.a.to_string(),
                "> 0.0",
            ));
        }
        if self.v_peak <= self.c {
            return Err(SimulatorError::invalid_parameter(
                "v_peak",
                format!("{} (with c={})", self.v_peak, self.c),
                "> c",
            ));
        }
        if self.tau_trace <= 0.0 {
            return Err(SimulatorError::invalid_parameter(
                "tau_trace",
                self.tau_trace.to_string(),
                "> 0.0",
            ));
        }
        Ok(())
    }
}

/// A neuron model family with one group's parameter values
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NeuronModel {
    /// Current-based leaky integrate-and-fire
    Lif(LifParams),
    /// Conductance-based leaky integrate-and-fire
    ConductanceLif(ConductanceLifParams),
    /// Izhikevich quadratic model
    Izhikevich(IzhikevichParams),
}

impl NeuronModel {
    /// Validate the wrapped parameter record
    pub fn validate(&self) -> Result<()> {
        match self {
            NeuronModel::Lif(p) => p.validate(),
            NeuronModel::ConductanceLif(p) => p.validate(),
            NeuronModel::Izhikevich(p) => p.validate(),
        }
    }

    /// Name of the family, used in shape mismatch diagnostics
    pub fn family_name(&self) -> &'static str {
        match self {
            NeuronModel::Lif(_) => "lif",
            NeuronModel::ConductanceLif(_) => "conductance-lif",
            NeuronModel::Izhikevich(_) => "izhikevich",
        }
    }

    /// Whether two models belong to the same family
    pub fn same_family(&self, other: &NeuronModel) -> bool {
        core::mem::discriminant(self) == core::mem::discriminant(other)
    }
}
