use crate::config::{DispersalPolicy, IfnPolicy};
use crate::grid::{CellState, GridState, TIMER_INACTIVE};
use crate::sim_params::SimParams;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Running tallies accumulated across the whole run.
#[derive(Debug, Default, Clone)]
pub struct SimCounters {
    pub dead_from_virion: u64,
    pub dead_from_both: u64,
    pub random_jump_virions: u64,
    pub random_jump_dips: u64,
    pub antiviral_cells: u64,
    pub total_antiviral_time: u64,
    pub regrowth_events: u64,
}

/// Per-step aggregate written to the metrics CSV.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepMetrics {
    pub step: u32,
    pub susceptible: usize,
    pub infected_virion: usize,
    pub infected_dip: usize,
    pub infected_both: usize,
    pub dead: usize,
    pub antiviral: usize,
    pub regrowth: usize,
    pub total_virions: u64,
    pub total_dips: u64,
    pub total_ifn: f64,
    pub max_ifn: f64,
    pub dead_from_virion: u64,
    pub dead_from_both: u64,
    pub random_jump_virions: u64,
    pub random_jump_dips: u64,
    pub antiviral_cells: u64,
    pub total_antiviral_time: u64,
    pub regrowth_events: u64,
    // Configuration echo, repeated on every row so each CSV stands alone.
    pub grid_size: usize,
    pub dispersal: DispersalPolicy,
    pub ifn_policy: IfnPolicy,
    pub rho: f64,
    pub burst_size_virion: u32,
    pub burst_size_dip: u32,
    /// DIP burst relative to the virion burst; zero when no virions burst.
    pub dip_advantage: f64,
    pub tau: i32,
    pub alpha: f64,
    pub mean_lysis_time: f64,
    pub virion_stimulates_ifn: bool,
}

/// Full grid snapshot for offline visualization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub step: u32,
    pub grid_size: usize,
    pub states: Vec<CellState>,
    pub virions: Vec<u32>,
    pub dips: Vec<u32>,
    pub ifn: Vec<f64>,
}

impl Snapshot {
    pub fn capture(step: u32, grid: &GridState) -> Self {
        Snapshot {
            step,
            grid_size: grid.size,
            states: grid.state.clone(),
            virions: grid.virions.clone(),
            dips: grid.dips.clone(),
            ifn: grid.ifn.clone(),
        }
    }
}

fn count_state(grid: &GridState, state: CellState) -> usize {
    grid.state.par_iter().filter(|&&s| s == state).count()
}

/// Aggregates one step's metrics. `total_ifn` reports the global pool under
/// the global policy and the summed per-cell concentration otherwise.
pub fn collect(
    step: u32,
    grid: &GridState,
    counters: &SimCounters,
    ifn_pool: f64,
    max_ifn: f64,
    params: &SimParams,
) -> StepMetrics {
    let total_ifn = if params.ifn_policy == IfnPolicy::Global {
        ifn_pool
    } else {
        grid.ifn.par_iter().sum()
    };
    let dip_advantage = if params.burst_size_virion == 0 {
        0.0
    } else {
        params.burst_size_dip as f64 / params.burst_size_virion as f64
    };
    StepMetrics {
        step,
        susceptible: count_state(grid, CellState::Susceptible),
        infected_virion: count_state(grid, CellState::InfectedVirion),
        infected_dip: count_state(grid, CellState::InfectedDip),
        infected_both: count_state(grid, CellState::InfectedBoth),
        dead: count_state(grid, CellState::Dead),
        antiviral: count_state(grid, CellState::Antiviral),
        regrowth: count_state(grid, CellState::Regrowth),
        total_virions: grid.virions.par_iter().map(|&v| v as u64).sum(),
        total_dips: grid.dips.par_iter().map(|&d| d as u64).sum(),
        total_ifn,
        max_ifn,
        dead_from_virion: counters.dead_from_virion,
        dead_from_both: counters.dead_from_both,
        random_jump_virions: counters.random_jump_virions,
        random_jump_dips: counters.random_jump_dips,
        antiviral_cells: counters.antiviral_cells,
        total_antiviral_time: counters.total_antiviral_time,
        regrowth_events: counters.regrowth_events,
        grid_size: params.grid_size,
        dispersal: params.dispersal,
        ifn_policy: params.ifn_policy,
        rho: params.rho,
        burst_size_virion: params.burst_size_virion,
        burst_size_dip: params.burst_size_dip,
        dip_advantage,
        tau: params.tau,
        alpha: params.alpha,
        mean_lysis_time: params.mean_lysis_time,
        virion_stimulates_ifn: params.virion_stimulates_ifn,
    }
}

/// Advances the residency timers that are not owned by any step phase:
/// how long each cell has sat SUSCEPTIBLE or in REGROWTH. Runs once per
/// step, after the phases.
pub fn tick_residency_timers(grid: &mut GridState) {
    for idx in 0..grid.area() {
        match grid.state[idx] {
            CellState::Susceptible => {
                if grid.time_susceptible[idx] >= 0 {
                    grid.time_susceptible[idx] += 1;
                }
            }
            CellState::Regrowth => {
                if grid.time_regrowth[idx] == TIMER_INACTIVE {
                    grid.time_regrowth[idx] = 0;
                }
                grid.time_regrowth[idx] += 1;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params(grid_size: usize, ifn_policy: IfnPolicy) -> SimParams {
        SimParams {
            grid_size,
            grid_area: grid_size * grid_size,
            time_steps: 10,
            dispersal: DispersalPolicy::RandomJump,
            jump_radius_virion: 0,
            jump_radius_dip: 0,
            partition_fraction: 0.5,
            ifn_policy,
            ifn_wave_radius: 0,
            ifn_enabled: ifn_policy != IfnPolicy::Disabled,
            alpha: 1.0,
            tau: 12,
            r: 1,
            virion_stimulates_ifn: true,
            ifn_both_fold: 1.0,
            dip_only_stimulate: 5.0,
            both_stimulate: 10.0,
            ifn_delay: 5,
            std_ifn_delay: 1.0,
            ifn_half_life: 4.0,
            ifn_floor: 1.0 / (grid_size * grid_size) as f64,
            rho: 0.026,
            burst_size_virion: 50,
            burst_size_dip: 100,
            mean_lysis_time: 12.0,
            std_lysis_time: 3.0,
            virion_half_life: 3.2,
            dip_half_life: 3.2,
            regrowth_mean: 24.0,
            regrowth_std: 6.0,
        }
    }

    #[test]
    fn state_counts_partition_the_grid() {
        let mut grid = GridState::new(6);
        grid.state[0] = CellState::InfectedVirion;
        grid.state[1] = CellState::InfectedBoth;
        grid.state[2] = CellState::Dead;
        grid.virions[3] = 7;
        grid.dips[3] = 9;
        grid.ifn[4] = 1.5;
        let counters = SimCounters::default();
        let params = test_params(6, IfnPolicy::Local);
        let metrics = collect(3, &grid, &counters, 0.0, 2.0, &params);
        assert_eq!(metrics.susceptible, 33);
        assert_eq!(metrics.infected_virion, 1);
        assert_eq!(metrics.infected_both, 1);
        assert_eq!(metrics.dead, 1);
        let total = metrics.susceptible
            + metrics.infected_virion
            + metrics.infected_dip
            + metrics.infected_both
            + metrics.dead
            + metrics.antiviral
            + metrics.regrowth;
        assert_eq!(total, 36);
        assert_eq!(metrics.total_virions, 7);
        assert_eq!(metrics.total_dips, 9);
        assert!((metrics.total_ifn - 1.5).abs() < 1e-12);
        assert_eq!(metrics.max_ifn, 2.0);
    }

    #[test]
    fn global_policy_reports_the_pool_not_the_cells() {
        let grid = GridState::new(4);
        let counters = SimCounters::default();
        let params = test_params(4, IfnPolicy::Global);
        let metrics = collect(0, &grid, &counters, 12.5, 12.5, &params);
        assert!((metrics.total_ifn - 12.5).abs() < 1e-12);
    }

    #[test]
    fn metrics_rows_echo_the_run_configuration() {
        let grid = GridState::new(4);
        let counters = SimCounters::default();
        let params = test_params(4, IfnPolicy::Local);
        let metrics = collect(2, &grid, &counters, 0.0, 0.0, &params);
        assert_eq!(metrics.grid_size, 4);
        assert_eq!(metrics.dispersal, DispersalPolicy::RandomJump);
        assert_eq!(metrics.ifn_policy, IfnPolicy::Local);
        assert_eq!(metrics.burst_size_virion, 50);
        assert_eq!(metrics.burst_size_dip, 100);
        assert!((metrics.dip_advantage - 2.0).abs() < 1e-12);
        assert!((metrics.rho - 0.026).abs() < 1e-12);
        assert!((metrics.mean_lysis_time - 12.0).abs() < 1e-12);
        assert!(metrics.virion_stimulates_ifn);
    }

    #[test]
    fn dip_advantage_is_zero_without_a_virion_burst() {
        let grid = GridState::new(4);
        let counters = SimCounters::default();
        let mut params = test_params(4, IfnPolicy::Disabled);
        params.burst_size_virion = 0;
        let metrics = collect(0, &grid, &counters, 0.0, 0.0, &params);
        assert_eq!(metrics.dip_advantage, 0.0);
    }

    #[test]
    fn residency_timers_advance_only_for_their_states() {
        let mut grid = GridState::new(3);
        grid.state[1] = CellState::Regrowth;
        grid.state[2] = CellState::Dead;
        tick_residency_timers(&mut grid);
        tick_residency_timers(&mut grid);
        assert_eq!(grid.time_susceptible[0], 2);
        assert_eq!(grid.time_regrowth[1], 2);
        assert_eq!(grid.time_susceptible[2], 0);
        assert_eq!(grid.time_regrowth[2], TIMER_INACTIVE);
    }
}
