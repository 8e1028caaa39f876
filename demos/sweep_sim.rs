//! End-to-end sweep against the simulated instrument: runs a log sweep
//! through a 1 kHz low-pass DUT, prints the response table, and writes the
//! dataset (JSON) and a Bode plot (PNG) to the working directory.
//!
//! Run with `cargo run --example sweep_sim`.

use anyhow::Result;
use freqsweep::{
    render_bode_png, CancelToken, DutModel, FrequencyPlan, FrequencySweep, PlotStyle,
    ProgressSink, SimInstrument, SweepConfig,
};

struct StdoutProgress;

impl ProgressSink for StdoutProgress {
    fn start(&mut self, total_steps: usize) {
        println!("sweeping {total_steps} points");
    }
    fn progress(&mut self, label: &str, step: usize) {
        println!("  [{step:>3}] {label}");
    }
    fn finish(&mut self) {
        println!("sweep done");
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let plan = FrequencyPlan::LogDecade {
        start_hz: 10.0,
        stop_hz: 100_000.0,
        points_per_decade: 5,
    };
    let config = SweepConfig::from_plan(&plan, 1.0, "sim-gen0", "sim-scope0")?;
    let sweep = FrequencySweep::new(config)?;

    let instrument = SimInstrument::new(DutModel::low_pass(1.0, 1000.0));
    instrument.set_noise(0.01);

    let dataset = sweep.run(&instrument, &mut StdoutProgress, &CancelToken::new())?;

    println!("\n{:>12}  {:>10}  {:>10}", "frequency", "gain dB", "phase deg");
    for result in dataset.iter() {
        println!(
            "{:>10.1} Hz  {:>10.3}  {:>10.2}",
            result.frequency_hz,
            result.gain_db(),
            result.phase_deg()
        );
    }

    std::fs::write("sweep.json", serde_json::to_vec_pretty(&dataset)?)?;
    std::fs::write("bode.png", render_bode_png(&dataset, PlotStyle::default())?)?;
    println!("\nwrote sweep.json and bode.png");
    Ok(())
}
