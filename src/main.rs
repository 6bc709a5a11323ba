use anyhow::Result;
use log::{error, info, trace};
use std::fs::File;
use std::io::Write;
use std::time::Instant;

use coinfection_sim::{Simulation, SimulationConfig};

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();

    info!("Starting co-infection simulation...");

    // --- Load Configuration ---
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = SimulationConfig::load(&config_path)?;

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = Simulation::new(config)?;
    let total_steps = sim.params.time_steps;

    info!("Starting simulation loop for {} steps...", total_steps);
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // Record the initial state before any dynamics run.
    sim.record();

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        if let Err(e) = sim.step() {
            error!("Error during simulation step {}: {}", step + 1, e);
            anyhow::bail!("Simulation step failed.");
        }
        sim.record();
        let step_duration = step_start_time.elapsed();

        // Print status periodically
        let current_time = Instant::now();
        let print_interval_secs = 5.0;
        let should_print_status =
            current_time.duration_since(previous_print_time).as_secs_f64() >= print_interval_secs;
        let is_last_step = step == total_steps - 1;

        if should_print_status || is_last_step {
            let latest = sim.metrics().last().cloned();
            if let Some(m) = latest {
                info!(
                    "Step [{}/{}] | S: {} | Iv: {} | Id: {} | Ib: {} | Dead: {} | AV: {} | Step Time: {:6.2} ms",
                    step + 1,
                    total_steps,
                    m.susceptible,
                    m.infected_virion,
                    m.infected_dip,
                    m.infected_both,
                    m.dead,
                    m.antiviral,
                    step_duration.as_secs_f64() * 1000.0
                );
            }
            previous_print_time = current_time;
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
    info!(
        "Simulation finished in {:.3} seconds ({:.3} minutes).",
        total_duration.as_secs_f64(),
        total_duration.as_secs_f64() / 60.0
    );

    // --- Save Recorded Data ---
    if sim.config.output.save_metrics {
        let filename = format!("{}_metrics.csv", sim.config.output.base_filename);
        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                for row in sim.metrics() {
                    writer.serialize(row)?;
                }
                writer.flush()?;
                info!("Metrics saved to {}", filename);
            }
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping metrics CSV as per config (save_metrics is false).");
    }

    if sim.config.output.save_snapshots {
        let output_format = sim.config.output.format.as_deref().unwrap_or("json");
        let snapshots = sim.snapshots();

        match output_format {
            "json" => {
                let filename = format!("{}_snapshots.json", sim.config.output.base_filename);
                match File::create(&filename) {
                    Ok(mut file) => match serde_json::to_string(snapshots) {
                        Ok(json_string) => {
                            if let Err(e) = file.write_all(json_string.as_bytes()) {
                                error!("Error writing snapshot JSON to '{}': {}", filename, e);
                            } else {
                                info!("All snapshots saved to {}", filename);
                            }
                        }
                        Err(e) => error!("Error serializing snapshots to JSON: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            "bincode" => {
                let filename = format!("{}_snapshots.bin", sim.config.output.base_filename);
                match File::create(&filename) {
                    Ok(file) => match bincode::serialize_into(file, snapshots) {
                        Ok(_) => info!("All snapshots saved to {} (binary format)", filename),
                        Err(e) => error!("Error serializing snapshots to bincode: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            "messagepack" => {
                let filename = format!("{}_snapshots.msgpack", sim.config.output.base_filename);
                match &mut File::create(&filename) {
                    Ok(file) => match rmp_serde::encode::write(file, snapshots) {
                        Ok(_) => info!("All snapshots saved to {} (MessagePack format)", filename),
                        Err(e) => error!("Error serializing snapshots to MessagePack: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
            other => {
                error!("Unknown output format: {}. Using JSON instead.", other);
                let filename = format!("{}_snapshots.json", sim.config.output.base_filename);
                match File::create(&filename) {
                    Ok(mut file) => match serde_json::to_string(snapshots) {
                        Ok(json_string) => {
                            if let Err(e) = file.write_all(json_string.as_bytes()) {
                                error!("Error writing snapshot JSON to '{}': {}", filename, e);
                            } else {
                                info!("All snapshots saved to {}", filename);
                            }
                        }
                        Err(e) => error!("Error serializing snapshots to JSON: {}", e),
                    },
                    Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
                }
            }
        }
    }

    info!("Simulation Complete.");
    Ok(())
}
