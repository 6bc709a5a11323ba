use crate::config::IfnPolicy;
use crate::sim_params::SimParams;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Precomputed neighborhood tables for the hexagonal lattice.
///
/// Cells are addressed by flat index `row * size + col`. Each table stores
/// only in-bounds neighbors, so edge and corner cells simply carry shorter
/// lists.
pub struct Topology {
    pub size: usize,
    /// The six adjacent hex cells.
    pub neighbors1: Vec<Vec<u32>>,
    /// The six distance-2 cells used by diffusion.
    pub neighbors2: Vec<Vec<u32>>,
    /// The six distance-3 cells used by diffusion; layout depends on row
    /// parity.
    pub neighbors3: Vec<Vec<u32>>,
    /// Jump targets within the virion jump radius, in a fixed shuffled order
    /// shared by every cell.
    pub jump_ring_virion: Vec<Vec<u32>>,
    /// Jump targets within the DIP jump radius.
    pub jump_ring_dip: Vec<Vec<u32>>,
    /// Cells within the IFN wave radius (including the cell itself); empty
    /// unless the local IFN policy is active.
    pub ifn_area: Vec<Vec<u32>>,
}

/// All lattice offsets within Euclidean distance `radius` of the origin,
/// shuffled once so jump targets are visited in a random but reproducible
/// order.
fn jump_offsets(radius: usize, rng: &mut StdRng) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets = Vec::new();
    for di in -r..=r {
        for dj in -r..=r {
            if di * di + dj * dj <= r * r {
                offsets.push((di, dj));
            }
        }
    }
    offsets.shuffle(rng);
    offsets
}

fn area_offsets(radius: usize) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets = Vec::new();
    for di in -r..=r {
        for dj in -r..=r {
            let distance = ((di * di + dj * dj) as f64).sqrt();
            if distance <= r as f64 {
                offsets.push((di, dj));
            }
        }
    }
    offsets
}

/// Applies the given offsets to every cell, keeping only in-bounds targets.
fn apply_offsets(size: usize, offsets: &[(i64, i64)]) -> Vec<Vec<u32>> {
    let bound = size as i64;
    let mut tables = Vec::with_capacity(size * size);
    for i in 0..bound {
        for j in 0..bound {
            let mut targets = Vec::new();
            for &(di, dj) in offsets {
                let (ni, nj) = (i + di, j + dj);
                if ni >= 0 && ni < bound && nj >= 0 && nj < bound {
                    targets.push((ni * bound + nj) as u32);
                }
            }
            tables.push(targets);
        }
    }
    tables
}

impl Topology {
    pub fn build(params: &SimParams, rng: &mut StdRng) -> Self {
        let size = params.grid_size;
        let bound = size as i64;
        let area = size * size;

        let mut neighbors1 = Vec::with_capacity(area);
        let mut neighbors2 = Vec::with_capacity(area);
        let mut neighbors3 = Vec::with_capacity(area);

        for i in 0..bound {
            for j in 0..bound {
                let ring1 = [
                    (i - 1, j),
                    (i + 1, j),
                    (i, j - 1),
                    (i, j + 1),
                    (i - 1, j + 1),
                    (i + 1, j + 1),
                ];
                let ring2 = [
                    (i, j - 2),
                    (i, j + 2),
                    (i - 2, j - 1),
                    (i + 2, j - 1),
                    (i - 2, j + 1),
                    (i + 2, j + 1),
                ];
                // The distance-3 ring flips between the row above and the row
                // below depending on row parity.
                let ring3 = if i % 2 == 0 {
                    [
                        (i - 2, j),
                        (i + 2, j),
                        (i - 1, j - 1),
                        (i + 1, j - 1),
                        (i - 1, j - 2),
                        (i + 1, j - 2),
                    ]
                } else {
                    [
                        (i - 2, j),
                        (i + 2, j),
                        (i - 1, j - 1),
                        (i + 1, j - 1),
                        (i - 1, j + 2),
                        (i + 1, j + 2),
                    ]
                };

                let in_bounds = |ring: &[(i64, i64); 6]| -> Vec<u32> {
                    ring.iter()
                        .filter(|&&(ni, nj)| ni >= 0 && ni < bound && nj >= 0 && nj < bound)
                        .map(|&(ni, nj)| (ni * bound + nj) as u32)
                        .collect()
                };

                neighbors1.push(in_bounds(&ring1));
                neighbors2.push(in_bounds(&ring2));
                neighbors3.push(in_bounds(&ring3));
            }
        }

        let jump_ring_virion = if params.jump_radius_virion > 0 {
            let offsets = jump_offsets(params.jump_radius_virion, rng);
            apply_offsets(size, &offsets)
        } else {
            vec![Vec::new(); area]
        };
        let jump_ring_dip = if params.jump_radius_dip > 0 {
            let offsets = jump_offsets(params.jump_radius_dip, rng);
            apply_offsets(size, &offsets)
        } else {
            vec![Vec::new(); area]
        };

        let ifn_area = if params.ifn_policy == IfnPolicy::Local {
            let offsets = area_offsets(params.ifn_wave_radius);
            apply_offsets(size, &offsets)
        } else {
            vec![Vec::new(); area]
        };

        Topology {
            size,
            neighbors1,
            neighbors2,
            neighbors3,
            jump_ring_virion,
            jump_ring_dip,
            ifn_area,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispersalPolicy;
    use rand::SeedableRng;

    fn test_params(size: usize) -> SimParams {
        SimParams {
            grid_size: size,
            grid_area: size * size,
            time_steps: 1,
            dispersal: DispersalPolicy::RadiusJump,
            jump_radius_virion: 3,
            jump_radius_dip: 2,
            partition_fraction: 0.5,
            ifn_policy: IfnPolicy::Local,
            ifn_wave_radius: 4,
            ifn_enabled: true,
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
            ifn_floor: 1.0 / (size * size) as f64,
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
    fn interior_cell_has_six_neighbors_at_each_distance() {
        let params = test_params(10);
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::build(&params, &mut rng);
        let center = 5 * 10 + 5;
        assert_eq!(topo.neighbors1[center].len(), 6);
        assert_eq!(topo.neighbors2[center].len(), 6);
        assert_eq!(topo.neighbors3[center].len(), 6);
    }

    #[test]
    fn corner_cell_lists_are_truncated_and_in_bounds() {
        let params = test_params(10);
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::build(&params, &mut rng);
        assert!(topo.neighbors1[0].len() < 6);
        for table in [&topo.neighbors1, &topo.neighbors2, &topo.neighbors3] {
            for targets in table.iter() {
                for &t in targets {
                    assert!((t as usize) < 100);
                }
            }
        }
    }

    #[test]
    fn same_seed_builds_identical_jump_rings() {
        let params = test_params(10);
        let mut rng_a = StdRng::seed_from_u64(9);
        let mut rng_b = StdRng::seed_from_u64(9);
        let topo_a = Topology::build(&params, &mut rng_a);
        let topo_b = Topology::build(&params, &mut rng_b);
        assert_eq!(topo_a.jump_ring_virion, topo_b.jump_ring_virion);
        assert_eq!(topo_a.jump_ring_dip, topo_b.jump_ring_dip);
    }

    #[test]
    fn jump_ring_covers_the_full_disc_for_interior_cells() {
        let params = test_params(10);
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::build(&params, &mut rng);
        // Radius-3 disc has 29 lattice points.
        let center = 5 * 10 + 5;
        assert_eq!(topo.jump_ring_virion[center].len(), 29);
        // Corner cell keeps only the in-bounds quarter.
        assert!(topo.jump_ring_virion[0].len() < 29);
        assert!(!topo.jump_ring_virion[0].is_empty());
    }

    #[test]
    fn ifn_area_includes_the_cell_itself() {
        let params = test_params(10);
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::build(&params, &mut rng);
        let center = 5 * 10 + 5;
        assert!(topo.ifn_area[center].contains(&(center as u32)));
    }

    #[test]
    fn distance_three_ring_depends_on_row_parity() {
        let params = test_params(10);
        let mut rng = StdRng::seed_from_u64(1);
        let topo = Topology::build(&params, &mut rng);
        // Even row reaches (i-1, j-2); odd row reaches (i-1, j+2).
        let even = 4 * 10 + 5;
        let odd = 5 * 10 + 5;
        assert!(topo.neighbors3[even].contains(&((3 * 10 + 3) as u32)));
        assert!(topo.neighbors3[odd].contains(&((4 * 10 + 7) as u32)));
    }
}
