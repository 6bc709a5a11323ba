use crate::config::DispersalPolicy;
use crate::grid::{CellState, GridState};
use crate::metrics::SimCounters;
use crate::sim_params::SimParams;
use crate::topology::Topology;
use rand::rngs::StdRng;
use rand::Rng;

// Diffusion weights for the three neighbor rings. The distance-3 weight is
// sqrt(3)/3, reflecting the longer hex path.
const WEIGHT_1: f64 = 1.0;
const WEIGHT_2: f64 = 0.5;

fn weight_3() -> f64 {
    3.0_f64.sqrt() / 3.0
}

/// The DIP burst grows with the DIP-to-virion ratio inside the lysing cell;
/// a cell with no virions releases the base DIP burst.
pub fn adjusted_dip_burst(params: &SimParams, virions: u32, dips: u32) -> u32 {
    if params.burst_size_dip == 0 {
        return 0;
    }
    if virions > 0 {
        let ratio = dips as f64 / virions as f64;
        params.burst_size_dip + (params.burst_size_dip as f64 * ratio).floor() as u32
    } else {
        params.burst_size_dip
    }
}

/// Releases one lysis burst from `origin` according to the configured policy.
///
/// `origin_virions`/`origin_dips` are the particle counts at the origin when
/// lysis fired; they set the adjusted DIP burst.
pub fn disperse_burst(
    grid: &mut GridState,
    topo: &Topology,
    params: &SimParams,
    counters: &mut SimCounters,
    rng: &mut StdRng,
    origin: usize,
    origin_virions: u32,
    origin_dips: u32,
) {
    let burst_v = params.burst_size_virion;
    let burst_d = adjusted_dip_burst(params, origin_virions, origin_dips);

    match params.dispersal {
        DispersalPolicy::CellToCell => {
            diffuse(grid, topo, rng, origin, burst_v, Species::Virion);
            diffuse(grid, topo, rng, origin, burst_d, Species::Dip);
        }
        DispersalPolicy::RandomJump => {
            random_jump(grid, counters, rng, burst_v, Species::Virion);
            random_jump(grid, counters, rng, burst_d, Species::Dip);
        }
        DispersalPolicy::RadiusJump => {
            radius_jump(grid, &topo.jump_ring_virion[origin], rng, burst_v, Species::Virion);
            radius_jump(grid, &topo.jump_ring_dip[origin], rng, burst_d, Species::Dip);
        }
        DispersalPolicy::Partition => {
            let jump_v = (burst_v as f64 * params.partition_fraction).floor() as u32;
            let jump_d = (burst_d as f64 * params.partition_fraction).floor() as u32;
            random_jump(grid, counters, rng, jump_v, Species::Virion);
            random_jump(grid, counters, rng, jump_d, Species::Dip);
            diffuse(grid, topo, rng, origin, burst_v - jump_v, Species::Virion);
            diffuse(grid, topo, rng, origin, burst_d - jump_d, Species::Dip);
        }
    }
}

#[derive(Clone, Copy)]
enum Species {
    Virion,
    Dip,
}

fn deposit(grid: &mut GridState, idx: usize, amount: u32, species: Species) {
    match species {
        Species::Virion => grid.virions[idx] += amount,
        Species::Dip => grid.dips[idx] += amount,
    }
}

/// Weighted diffusion to the three neighbor rings.
///
/// Group shares use the nominal six-neighbor ring sizes, and each ring member
/// receives share/6, so particles aimed at out-of-bounds positions are lost
/// at the monolayer edge. Distance-1 deposits land only on SUSCEPTIBLE
/// cells; the outer rings are unconditional.
fn diffuse(
    grid: &mut GridState,
    topo: &Topology,
    rng: &mut StdRng,
    origin: usize,
    amount: u32,
    species: Species,
) {
    if amount == 0 {
        return;
    }
    let w3 = weight_3();
    let total_ratio = 6.0 * (WEIGHT_1 + WEIGHT_2 + w3);

    let mut group1 = (amount as f64 * (WEIGHT_1 * 6.0) / total_ratio).floor() as u32;
    let mut group2 = (amount as f64 * (WEIGHT_2 * 6.0) / total_ratio).floor() as u32;
    let mut group3 = (amount as f64 * (w3 * 6.0) / total_ratio).floor() as u32;

    let mut remaining = amount - (group1 + group2 + group3);
    while remaining > 0 {
        let rand_val = rng.random::<f64>() * total_ratio;
        if rand_val < WEIGHT_1 {
            group1 += 1;
        } else if rand_val < WEIGHT_1 + WEIGHT_2 {
            group2 += 1;
        } else {
            group3 += 1;
        }
        remaining -= 1;
    }

    let share1 = group1 / 6;
    let share2 = group2 / 6;
    let share3 = group3 / 6;

    for n in 0..topo.neighbors1[origin].len() {
        let idx = topo.neighbors1[origin][n] as usize;
        if grid.state[idx] == CellState::Susceptible {
            deposit(grid, idx, share1, species);
        }
    }
    for n in 0..topo.neighbors2[origin].len() {
        let idx = topo.neighbors2[origin][n] as usize;
        deposit(grid, idx, share2, species);
    }
    for n in 0..topo.neighbors3[origin].len() {
        let idx = topo.neighbors3[origin][n] as usize;
        deposit(grid, idx, share3, species);
    }
}

/// Drops each particle on a uniformly random grid cell.
fn random_jump(
    grid: &mut GridState,
    counters: &mut SimCounters,
    rng: &mut StdRng,
    amount: u32,
    species: Species,
) {
    let area = grid.area();
    for _ in 0..amount {
        let idx = rng.random_range(0..area);
        deposit(grid, idx, 1, species);
        match species {
            Species::Virion => counters.random_jump_virions += 1,
            Species::Dip => counters.random_jump_dips += 1,
        }
    }
}

/// Drops each particle on a random in-bounds cell within the jump ring.
/// Rings contain only valid targets, so every released particle lands.
fn radius_jump(
    grid: &mut GridState,
    ring: &[u32],
    rng: &mut StdRng,
    amount: u32,
    species: Species,
) {
    if ring.is_empty() {
        return;
    }
    for _ in 0..amount {
        let idx = ring[rng.random_range(0..ring.len())] as usize;
        deposit(grid, idx, 1, species);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispersalPolicy, IfnPolicy};
    use rand::SeedableRng;

    fn params_with_policy(policy: DispersalPolicy) -> SimParams {
        SimParams {
            grid_size: 10,
            grid_area: 100,
            time_steps: 1,
            dispersal: policy,
            jump_radius_virion: 5,
            jump_radius_dip: 5,
            partition_fraction: 0.5,
            ifn_policy: IfnPolicy::Disabled,
            ifn_wave_radius: 0,
            ifn_enabled: false,
            alpha: 0.0,
            tau: 0,
            r: 0,
            virion_stimulates_ifn: true,
            ifn_both_fold: 0.0,
            dip_only_stimulate: 0.0,
            both_stimulate: 0.0,
            ifn_delay: 0,
            std_ifn_delay: 0.0,
            ifn_half_life: 0.0,
            ifn_floor: 0.01,
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

    fn setup(policy: DispersalPolicy) -> (GridState, Topology, SimParams, SimCounters, StdRng) {
        let params = params_with_policy(policy);
        let mut rng = StdRng::seed_from_u64(11);
        let topo = Topology::build(&params, &mut rng);
        let grid = GridState::new(params.grid_size);
        let counters = SimCounters::default();
        (grid, topo, params, counters, rng)
    }

    #[test]
    fn adjusted_dip_burst_scales_with_ratio() {
        let params = params_with_policy(DispersalPolicy::RandomJump);
        // No virions at the origin: base burst only.
        assert_eq!(adjusted_dip_burst(&params, 0, 40), 100);
        // 2 virions, 5 DIPs: 100 + floor(100 * 2.5) = 350.
        assert_eq!(adjusted_dip_burst(&params, 2, 5), 350);
        assert_eq!(adjusted_dip_burst(&params, 10, 0), 100);
    }

    #[test]
    fn random_jump_conserves_every_particle() {
        let (mut grid, topo, params, mut counters, mut rng) =
            setup(DispersalPolicy::RandomJump);
        disperse_burst(&mut grid, &topo, &params, &mut counters, &mut rng, 55, 0, 0);
        let total_v: u32 = grid.virions.iter().sum();
        let total_d: u32 = grid.dips.iter().sum();
        assert_eq!(total_v, 50);
        assert_eq!(total_d, 100);
        assert_eq!(counters.random_jump_virions, 50);
        assert_eq!(counters.random_jump_dips, 100);
    }

    #[test]
    fn radius_jump_delivers_the_full_burst_even_from_a_corner() {
        let (mut grid, topo, params, mut counters, mut rng) =
            setup(DispersalPolicy::RadiusJump);
        disperse_burst(&mut grid, &topo, &params, &mut counters, &mut rng, 0, 1, 0);
        let total_v: u32 = grid.virions.iter().sum();
        let total_d: u32 = grid.dips.iter().sum();
        assert_eq!(total_v, 50);
        assert_eq!(total_d, 100);
        // Every landing spot must be inside the corner cell's ring.
        for (idx, &v) in grid.virions.iter().enumerate() {
            if v > 0 {
                assert!(topo.jump_ring_virion[0].contains(&(idx as u32)));
            }
        }
    }

    #[test]
    fn diffusion_skips_non_susceptible_adjacent_cells() {
        let (mut grid, topo, params, mut counters, mut rng) =
            setup(DispersalPolicy::CellToCell);
        let origin = 5 * 10 + 5;
        // Kill one adjacent cell; it must receive nothing.
        let blocked = topo.neighbors1[origin][0] as usize;
        grid.state[blocked] = CellState::Dead;
        disperse_burst(&mut grid, &topo, &params, &mut counters, &mut rng, origin, 1, 0);
        assert_eq!(grid.virions[blocked], 0);
        assert_eq!(grid.dips[blocked], 0);
        // The remaining adjacent cells all got the same distance-1 share.
        let shares: Vec<u32> = topo.neighbors1[origin][1..]
            .iter()
            .map(|&n| grid.virions[n as usize])
            .collect();
        assert!(shares.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn diffusion_never_exceeds_the_burst() {
        let (mut grid, topo, params, mut counters, mut rng) =
            setup(DispersalPolicy::CellToCell);
        let origin = 5 * 10 + 5;
        disperse_burst(&mut grid, &topo, &params, &mut counters, &mut rng, origin, 1, 0);
        let total_v: u32 = grid.virions.iter().sum();
        let total_d: u32 = grid.dips.iter().sum();
        assert!(total_v <= 50);
        assert!(total_d <= 100);
        assert!(total_v > 0);
    }

    #[test]
    fn partition_splits_between_jump_and_diffusion() {
        let (mut grid, topo, params, mut counters, mut rng) =
            setup(DispersalPolicy::Partition);
        let origin = 5 * 10 + 5;
        disperse_burst(&mut grid, &topo, &params, &mut counters, &mut rng, origin, 1, 0);
        // Half of each burst random-jumped.
        assert_eq!(counters.random_jump_virions, 25);
        assert_eq!(counters.random_jump_dips, 50);
        let total_v: u32 = grid.virions.iter().sum();
        assert!(total_v >= 25 && total_v <= 50);
    }
}
