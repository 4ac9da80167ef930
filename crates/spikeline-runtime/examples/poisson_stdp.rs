//! A Poisson-driven pool learning under STDP with weight normalization
//!
//! Builds a 200-neuron LIF pool driven by 200 Poisson inputs, runs it for two
//! simulated seconds, and writes the spike log plus initial and periodic
//! weight snapshots to a scratch directory.
//!
//! Run with `RUST_LOG=info cargo run --example poisson_stdp`.

use spikeline_runtime::{
    corrected_presynaptic_id, Connectivity, InputGroupParams, InputSource, LifParams,
    NeuronGroupParams, NeuronModel, PairStdp, PopulationSelect, Result, SpikeLogReader,
    SpikeMonitor, SpikingModel, StdpParams, SynapseGroupParams, WeightInit, WeightMonitor,
    WeightNormParams, WeightNormalization,
};

fn main() -> Result<()> {
    env_logger::init();

    let out_dir = std::env::temp_dir().join("spikeline-poisson-stdp");
    std::fs::create_dir_all(&out_dir).map_err(spikeline_runtime::StorageError::from)?;
    let spike_path = out_dir.join("spikes.bin");
    let weights_path = out_dir.join("weights.bin");
    let initial_path = out_dir.join("initial_weights.bin");

    let mut model = SpikingModel::new();
    model.set_timestep(1e-4)?;

    let pool = model.add_neuron_group(&NeuronGroupParams::row(
        200,
        NeuronModel::Lif(LifParams::default()),
    ))?;
    let stim = model.add_input_neuron_group(&InputGroupParams::row(
        200,
        InputSource::Poisson {
            rate: 35.0,
            seed: 7,
        },
    ))?;
    model.add_synapse_group(
        corrected_presynaptic_id(stim, true),
        pool,
        &SynapseGroupParams {
            connectivity: Connectivity::Random { probability: 0.1 },
            weight: WeightInit::Uniform {
                lo: 100.0,
                hi: 400.0,
            },
            delay_range: (1e-4, 5e-4),
            seed: 3,
            ..Default::default()
        },
    )?;

    model.add_plasticity_rule(Box::new(PairStdp::new(StdpParams {
        a_plus: 2.0,
        a_minus: 2.4,
        tau_plus: 0.02,
        tau_minus: 0.02,
        w_min: 0.0,
        w_max: 500.0,
    })?))?;
    model.add_plasticity_rule(Box::new(WeightNormalization::new(
        WeightNormParams::default(),
    )?))?;

    let spikes = model.add_activity_monitor(Box::new(
        SpikeMonitor::new(PopulationSelect::Ordinary).with_sink(&spike_path)?,
    ))?;
    model.add_activity_monitor(Box::new(
        WeightMonitor::new(0.1)?
            .with_sink(&weights_path)?
            .with_initial_weights_file(&initial_path),
    ))?;

    model.run(2.0)?;

    let recorded = model
        .monitor(spikes)
        .and_then(|m| m.as_any().downcast_ref::<SpikeMonitor>())
        .map(|m| m.total_recorded())
        .unwrap_or(0);
    let reader = SpikeLogReader::open(&spike_path)?;
    println!(
        "simulated {:.1}s: {} spikes ({:.1} Hz mean over {} neurons)",
        model.current_time_in_seconds(),
        recorded,
        recorded as f32 / model.current_time_in_seconds() / 200.0,
        model.neurons().len(),
    );
    println!(
        "spike log {} holds {} records; weight snapshots in {}",
        spike_path.display(),
        reader.len(),
        weights_path.display(),
    );
    Ok(())
}
