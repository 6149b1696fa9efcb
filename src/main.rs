use anyhow::Result;
use clap::Parser;
use colony_common::SimulationConfig;
use colony_engine::output::{self, DataFormat};
use colony_engine::{synthetic, Simulation};
use log::{debug, error, info, trace};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config.toml file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Number of trajectory steps to play (overrides timing.total_steps)
    #[arg(long)]
    steps: Option<u32>,

    /// Recorded trajectory to replay (overrides input.trajectory)
    #[arg(long)]
    trajectory: Option<PathBuf>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Colony Signalling Engine...");

    // --- Load Configuration ---
    let config = SimulationConfig::load(&args.config)?;
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    debug!("Simulation Parameters: {:#?}", sim.params());

    // --- Load or Generate Trajectory ---
    let input = sim.config().input.clone();
    let trajectory_path = args.trajectory.or_else(|| input.trajectory.as_ref().map(PathBuf::from));
    let trajectory = match trajectory_path {
        Some(path) => output::load_trajectory(&path, input.format.as_deref())?,
        None => {
            info!("No trajectory given; generating a synthetic colony.");
            synthetic::generate(&input.synthetic, sim.params())?
        }
    };
    sim.load_trajectory(trajectory)?;

    // --- Simulation Loop ---
    let available = sim.remaining_steps() as u32;
    let total_steps = args.steps.or(sim.config().timing.total_steps).unwrap_or(available).min(available);
    let record_interval_steps = sim.config().timing.record_interval_steps.max(1);
    info!(
        "Recording snapshot every {} steps ({:.2} s).",
        record_interval_steps,
        record_interval_steps as f64 * sim.params().macro_dt
    );

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot (time = 0) ---
    info!("Recording initial snapshot (t=0)...");
    if let Err(e) = sim.record_snapshot() {
        error!("Error recording initial snapshot: {}", e);
        anyhow::bail!("Failed to record initial snapshot.");
    }

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        let out = match sim.step() {
            Ok(Some(out)) => out,
            Ok(None) => {
                info!("Trajectory exhausted after {} steps.", step);
                break;
            }
            Err(e) => {
                error!("Error during simulation step {}: {}", step + 1, e);
                anyhow::bail!("Simulation step failed.");
            }
        };
        let step_duration = step_start_time.elapsed();

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step == total_steps - 1;

        if should_print_status || is_record_step || is_last_step {
            let stats = &out.statistics;
            info!(
                "Step [{}/{}] ({:.2} s) | Agents: {} | A/B: {}/{} | Similarity: {:.3} | Step Time: {:6.2} ms | Elapsed: {:.2} s",
                step + 1,
                total_steps,
                stats.time,
                stats.total,
                stats.count_a,
                stats.count_b,
                stats.mean_similarity,
                step_duration.as_secs_f64() * 1000.0,
                start_time.elapsed().as_secs_f64()
            );
            previous_print_time = now;

            if is_record_step || is_last_step {
                if let Err(e) = sim.record_snapshot() {
                    error!("Error recording snapshot at step {}: {}", step + 1, e);
                    anyhow::bail!("Failed to record snapshot.");
                }
            }
        } else {
            trace!(
                "Step [{}/{}] completed in {:.2} ms",
                step + 1,
                total_steps,
                step_duration.as_secs_f64() * 1000.0
            );
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    info!("Saving recorded data...");
    let output_config = sim.config().output.clone();
    if output_config.save_snapshots {
        let format = DataFormat::from_config(output_config.format.as_deref());
        output::write_snapshots(&output_config.base_filename, sim.get_recorded_snapshots(), format)?;
    } else {
        info!("Skipping saving snapshots as per config (save_snapshots is false).");
    }

    if output_config.save_history {
        let filename = format!("{}_history.csv", output_config.base_filename);
        output::write_history_csv(&filename, sim.history())?;
    } else {
        info!("Skipping saving history as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}
