use crate::sim_params::SimParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How particles released at lysis are distributed across the grid.
/// Exactly one policy governs the whole run.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DispersalPolicy {
    /// Weighted diffusion to the distance-1/2/3 hex neighbors.
    CellToCell,
    /// Every particle lands on a uniformly random grid cell.
    RandomJump,
    /// Every particle jumps to a precomputed in-bounds target within a radius.
    RadiusJump,
    /// A configured fraction random-jumps, the remainder diffuses cell-to-cell.
    Partition,
}

/// How the interferon signal spreads.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IfnPolicy {
    /// A single well-mixed pool; every cell sees pool / grid area.
    Global,
    /// Per-cell concentrations fed by producers within an influence radius.
    Local,
    /// No interferon pathway at all.
    Disabled,
}

/// Where the initial virions/DIPs are placed.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SeedingPolicy {
    /// Deposit the initial particle counts at the seed cell, state untouched.
    CenterParticles,
    /// Deposit the counts and pre-set the seed cell's infection state.
    CenterState,
    /// Scatter each initial particle onto a uniformly random cell.
    Scatter,
}

// Grid geometry and run length
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LatticeConfig {
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default = "default_time_steps")]
    pub time_steps: u32,
}

// Particle dispersal settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DispersalConfig {
    pub policy: DispersalPolicy,
    #[serde(default = "default_jump_radius")]
    pub jump_radius_virion: usize,
    #[serde(default = "default_jump_radius")]
    pub jump_radius_dip: usize,
    /// Fraction of each burst sent by random jump under the partition policy.
    #[serde(default = "default_partition_fraction")]
    pub partition_fraction: f64,
}

// Interferon settings
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct IfnConfig {
    pub policy: IfnPolicy,
    /// Influence radius for the local policy (cells within Euclidean distance).
    #[serde(default = "default_ifn_radius")]
    pub wave_radius: usize,
    /// Antiviral response scale; zero disables the antiviral pathway.
    #[serde(default = "default_tau")]
    pub tau: i32,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_ifn_both_fold")]
    pub both_fold: f64,
    /// Whether virion-infected cells stimulate IFN (DIP stimulation is separate).
    #[serde(default = "default_true")]
    pub virion_stimulates: bool,
    #[serde(default = "default_ifn_delay")]
    pub production_delay: i32,
    #[serde(default = "default_std_ifn_delay")]
    pub production_delay_std: f64,
    #[serde(default = "default_ifn_half_life")]
    pub half_life: f64,
}

// Infection kinetics
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct KineticsConfig {
    #[serde(default = "default_rho")]
    pub rho: f64,
    #[serde(default = "default_burst_size_v")]
    pub burst_size_virion: u32,
    #[serde(default = "default_burst_size_d")]
    pub burst_size_dip: u32,
    #[serde(default = "default_true")]
    pub dip_enabled: bool,
    #[serde(default = "default_mean_lysis_time")]
    pub mean_lysis_time: f64,
    #[serde(default = "default_particle_half_life")]
    pub virion_half_life: f64,
    #[serde(default = "default_particle_half_life")]
    pub dip_half_life: f64,
    #[serde(default = "default_regrowth_mean")]
    pub regrowth_mean: f64,
    #[serde(default = "default_regrowth_std")]
    pub regrowth_std: f64,
}

// Initial conditions
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SeedingConfig {
    pub policy: SeedingPolicy,
    #[serde(default = "default_v_initial")]
    pub initial_virions: u32,
    #[serde(default)]
    pub initial_dips: u32,
    /// Seed cell for the center policies; grid center when absent.
    #[serde(default)]
    pub seed_row: Option<usize>,
    #[serde(default)]
    pub seed_col: Option<usize>,
}

// Output settings consumed by the binary, not by the core engine.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_base_filename")]
    pub base_filename: String,
    #[serde(default = "default_true")]
    pub save_metrics: bool,
    #[serde(default)]
    pub save_snapshots: bool,
    /// Snapshot format: "json", "bincode", "messagepack".
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default = "default_record_interval")]
    pub snapshot_interval: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: default_base_filename(),
            save_metrics: true,
            save_snapshots: false,
            format: None,
            snapshot_interval: default_record_interval(),
        }
    }
}

fn default_grid_size() -> usize { 50 }
fn default_time_steps() -> u32 { 502 }
fn default_jump_radius() -> usize { 5 }
fn default_partition_fraction() -> f64 { 0.5 }
fn default_ifn_radius() -> usize { 10 }
fn default_tau() -> i32 { 12 }
fn default_alpha() -> f64 { 1.0 }
fn default_ifn_both_fold() -> f64 { 1.0 }
fn default_ifn_delay() -> i32 { 5 }
fn default_std_ifn_delay() -> f64 { 1.0 }
fn default_ifn_half_life() -> f64 { 4.0 }
fn default_rho() -> f64 { 0.026 }
fn default_burst_size_v() -> u32 { 50 }
fn default_burst_size_d() -> u32 { 100 }
fn default_mean_lysis_time() -> f64 { 12.0 }
fn default_particle_half_life() -> f64 { 3.2 }
fn default_regrowth_mean() -> f64 { 24.0 }
fn default_regrowth_std() -> f64 { 6.0 }
fn default_v_initial() -> u32 { 1 }
fn default_base_filename() -> String { "simulation".to_string() }
fn default_record_interval() -> u32 { 24 }
fn default_true() -> bool { true }
fn default_rng_seed() -> u64 { 42 }

/// Main simulation configuration, loaded from a TOML file.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SimulationConfig {
    pub lattice: LatticeConfig,
    pub dispersal: DispersalConfig,
    pub ifn: IfnConfig,
    pub kinetics: KineticsConfig,
    pub seeding: SeedingConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Single seed for the process-wide RNG; identical configs with identical
    /// seeds produce identical runs.
    #[serde(default = "default_rng_seed")]
    pub rng_seed: u64,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let config_str = std::fs::read_to_string(path_ref).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e)
        })?;
        let config: SimulationConfig = toml::from_str(&config_str).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from '{}': {}", path_ref.display(), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run meaningfully.
    pub fn validate(&self) -> Result<()> {
        if self.lattice.grid_size == 0 {
            anyhow::bail!("grid_size must be positive.");
        }
        if !(0.0..=1.0).contains(&self.kinetics.rho) {
            anyhow::bail!("rho must lie in [0, 1], got {}.", self.kinetics.rho);
        }
        if !(0.0..=1.0).contains(&self.dispersal.partition_fraction) {
            anyhow::bail!(
                "partition_fraction must lie in [0, 1], got {}.",
                self.dispersal.partition_fraction
            );
        }
        if self.dispersal.policy == DispersalPolicy::RadiusJump
            && self.dispersal.jump_radius_virion == 0
            && self.dispersal.jump_radius_dip == 0
        {
            anyhow::bail!("radius-jump dispersal needs a non-zero jump radius.");
        }
        if self.ifn.policy == IfnPolicy::Local && self.ifn.wave_radius == 0 {
            anyhow::bail!("local IFN spread needs a non-zero wave_radius.");
        }
        if self.kinetics.mean_lysis_time <= 0.0 {
            anyhow::bail!("mean_lysis_time must be positive.");
        }
        if let (Some(row), Some(col)) = (self.seeding.seed_row, self.seeding.seed_col) {
            if row >= self.lattice.grid_size || col >= self.lattice.grid_size {
                anyhow::bail!(
                    "seed cell ({}, {}) lies outside the {}x{} grid.",
                    row,
                    col,
                    self.lattice.grid_size,
                    self.lattice.grid_size
                );
            }
        }
        if self.ifn.tau < 0 {
            anyhow::bail!("tau must be non-negative.");
        }
        Ok(())
    }

    /// Converts the configuration into the flat parameter struct used at
    /// runtime. IFN-disabled runs zero out the whole pathway here so the
    /// engine never needs to re-check the policy for rate constants.
    pub fn get_sim_params(&self) -> SimParams {
        let grid_size = self.lattice.grid_size;
        let grid_area = grid_size * grid_size;

        let ifn_enabled = self.ifn.policy != IfnPolicy::Disabled;
        let (alpha, tau, both_fold, ifn_delay, std_ifn_delay, ifn_half_life) = if ifn_enabled {
            (
                self.ifn.alpha,
                self.ifn.tau,
                self.ifn.both_fold,
                self.ifn.production_delay,
                self.ifn.production_delay_std,
                self.ifn.half_life,
            )
        } else {
            (0.0, 0, 0.0, 0, 0.0, 0.0)
        };

        // R is the virion IFN stimulation rate; zero when virions do not
        // stimulate IFN.
        let r = if self.ifn.virion_stimulates {
            (1.0 * both_fold) as i32
        } else {
            0
        };

        let burst_size_dip = if self.kinetics.dip_enabled {
            self.kinetics.burst_size_dip
        } else {
            0
        };
        let dip_only_stimulate = if self.kinetics.dip_enabled {
            5.0 * both_fold
        } else {
            0.0
        };
        let both_stimulate = 10.0 * both_fold;

        let (jump_radius_virion, jump_radius_dip) = match self.dispersal.policy {
            DispersalPolicy::RadiusJump => (
                self.dispersal.jump_radius_virion,
                self.dispersal.jump_radius_dip,
            ),
            _ => (0, 0),
        };

        let ifn_wave_radius = match self.ifn.policy {
            IfnPolicy::Local => self.ifn.wave_radius,
            _ => 0,
        };

        SimParams {
            grid_size,
            grid_area,
            time_steps: self.lattice.time_steps,
            dispersal: self.dispersal.policy,
            jump_radius_virion,
            jump_radius_dip,
            partition_fraction: self.dispersal.partition_fraction,
            ifn_policy: self.ifn.policy,
            ifn_wave_radius,
            ifn_enabled,
            alpha,
            tau,
            r,
            virion_stimulates_ifn: self.ifn.virion_stimulates,
            ifn_both_fold: both_fold,
            dip_only_stimulate,
            both_stimulate,
            ifn_delay,
            std_ifn_delay,
            ifn_half_life,
            // Concentrations below one part per grid area are treated as gone.
            ifn_floor: 1.0 / grid_area as f64,
            rho: self.kinetics.rho,
            burst_size_virion: self.kinetics.burst_size_virion,
            burst_size_dip,
            mean_lysis_time: self.kinetics.mean_lysis_time,
            std_lysis_time: self.kinetics.mean_lysis_time / 4.0,
            virion_half_life: self.kinetics.virion_half_life,
            dip_half_life: self.kinetics.dip_half_life,
            regrowth_mean: self.kinetics.regrowth_mean,
            regrowth_std: self.kinetics.regrowth_std,
        }
    }
}
