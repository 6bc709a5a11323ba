use crate::config::{IfnPolicy, SeedingPolicy, SimulationConfig};
use crate::dispersal;
use crate::grid::{CellState, GridState, TIMER_CONSUMED, TIMER_INACTIVE};
use crate::metrics::{self, SimCounters, Snapshot, StepMetrics};
use crate::sim_params::SimParams;
use crate::topology::Topology;
use anyhow::Result;
use log::{debug, info};
use rand::prelude::*;
use rand_distr::Normal;

/// Manages the state and execution of the co-infection simulation.
pub struct Simulation {
    /// The full configuration the run was built from.
    pub config: SimulationConfig,
    /// Flat runtime parameters derived from the configuration.
    pub params: SimParams,
    /// Precomputed neighborhood tables.
    pub topology: Topology,
    /// Per-cell state vectors.
    pub grid: GridState,
    /// Single host-side RNG; every stochastic draw in the run comes from it.
    rng: StdRng,
    /// Run-wide event tallies.
    pub counters: SimCounters,
    /// The current step number.
    pub current_step: u32,

    /// Global policy: the authoritative well-mixed pool. Local policy: a
    /// running total of everything produced, kept for reporting.
    ifn_pool: f64,
    /// Largest pool value seen during the run.
    max_ifn: f64,
    /// Pool averaged over the grid, refreshed each step under the global
    /// policy.
    ifn_per_cell: f64,

    lysis_delay: Normal<f64>,
    antiviral_duration: Option<Normal<f64>>,
    regrowth_delay: Normal<f64>,
    ifn_delay_jitter: Option<Normal<f64>>,

    virion_decay: f64,
    dip_decay: f64,
    ifn_decay: f64,

    recorded_snapshots: Vec<Snapshot>,
    recorded_metrics: Vec<StepMetrics>,
}

impl Simulation {
    /// Creates a new `Simulation`, building topology tables and placing the
    /// initial particles.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let params = config.get_sim_params();
        let mut rng = StdRng::seed_from_u64(config.rng_seed);

        let topology = Topology::build(&params, &mut rng);
        let mut grid = GridState::new(params.grid_size);

        let lysis_delay = Normal::new(params.mean_lysis_time, params.std_lysis_time)?;
        let antiviral_duration = if params.tau > 0 {
            Some(Normal::new(params.tau as f64, params.tau as f64 / 4.0)?)
        } else {
            None
        };
        let regrowth_delay = Normal::new(params.regrowth_mean, params.regrowth_std)?;
        let ifn_delay_jitter = if params.ifn_enabled && params.std_ifn_delay > 0.0 {
            Some(Normal::new(0.0, params.std_ifn_delay)?)
        } else {
            None
        };

        seed_particles(&mut grid, &config, &params, &mut rng);

        info!(
            "Initialized {}x{} lattice, {:?} dispersal, {:?} IFN",
            params.grid_size, params.grid_size, params.dispersal, params.ifn_policy
        );

        Ok(Self {
            virion_decay: SimParams::half_life_factor(params.virion_half_life),
            dip_decay: SimParams::half_life_factor(params.dip_half_life),
            ifn_decay: SimParams::half_life_factor(params.ifn_half_life),
            config,
            params,
            topology,
            grid,
            rng,
            counters: SimCounters::default(),
            current_step: 0,
            ifn_pool: 0.0,
            max_ifn: 0.0,
            ifn_per_cell: 0.0,
            lysis_delay,
            antiviral_duration,
            regrowth_delay,
            ifn_delay_jitter,
            recorded_snapshots: Vec::new(),
            recorded_metrics: Vec::new(),
        })
    }

    /// Advances the simulation by one step.
    pub fn step(&mut self) -> Result<()> {
        self.grid.state_changed.iter_mut().for_each(|c| *c = false);

        if self.params.ifn_enabled {
            self.update_ifn_field();
        }
        self.evaluate_infections();
        self.advance_lysis();
        self.evaluate_cross_infections();
        self.advance_regrowth();
        self.grid.commit();
        self.decay_particles();

        metrics::tick_residency_timers(&mut self.grid);
        self.current_step += 1;
        Ok(())
    }

    /// IFN decay, production by infected cells, and refresh of the per-cell
    /// average used by the global policy.
    fn update_ifn_field(&mut self) {
        let jitter_dist = self.ifn_delay_jitter;

        // Decay runs once per step over the whole field.
        match self.params.ifn_policy {
            IfnPolicy::Global => {
                self.ifn_pool *= self.ifn_decay;
                if self.ifn_pool < self.params.ifn_floor {
                    self.ifn_pool = 0.0;
                }
            }
            IfnPolicy::Local => {
                let floor = self.params.ifn_floor;
                let factor = self.ifn_decay;
                for c in self.grid.ifn.iter_mut() {
                    *c *= factor;
                    if *c < floor {
                        *c = 0.0;
                    }
                }
            }
            IfnPolicy::Disabled => {}
        }

        // Production by infected cells, gated by a jittered delay after
        // infection.
        for idx in 0..self.grid.area() {
            let state = self.grid.state[idx];
            let virion_producer =
                state == CellState::InfectedVirion || state == CellState::InfectedBoth;
            let dip_producer = state == CellState::InfectedDip || state == CellState::InfectedBoth;

            if dip_producer && self.grid.time_infected_dip[idx] >= 0 {
                self.grid.time_infected_dip[idx] += 1;
            }
            if self.params.tau == 0 || (!virion_producer && !dip_producer) {
                continue;
            }

            let jitter = match jitter_dist {
                Some(dist) => self.rng.sample(dist).floor() as i32,
                None => 0,
            };
            let mut amount = 0.0;
            if virion_producer {
                if self.grid.time_infected[idx] > self.params.ifn_delay + jitter {
                    amount = if state == CellState::InfectedBoth {
                        self.params.r as f64 + self.params.both_stimulate
                    } else {
                        self.params.r as f64 * self.params.ifn_both_fold
                    };
                }
            } else if self.grid.time_infected_dip[idx] > self.params.ifn_delay + jitter {
                amount = self.params.dip_only_stimulate;
            }
            if amount <= 0.0 {
                continue;
            }

            match self.params.ifn_policy {
                IfnPolicy::Global => {
                    self.ifn_pool += amount;
                }
                IfnPolicy::Local => {
                    let area = &self.topology.ifn_area[idx];
                    if !area.is_empty() {
                        let per_cell = amount / area.len() as f64;
                        for &n in area {
                            self.grid.ifn[n as usize] += per_cell;
                        }
                    }
                    self.ifn_pool += amount;
                }
                IfnPolicy::Disabled => {}
            }
        }

        if self.ifn_pool > self.max_ifn {
            self.max_ifn = self.ifn_pool;
        }
        self.ifn_per_cell = self.ifn_pool / self.params.grid_area as f64;
        // Under the global policy the per-cell field carries the pool
        // average, so snapshots see the same concentrations the cells do.
        if self.params.ifn_policy == IfnPolicy::Global {
            self.grid.ifn.fill(self.ifn_per_cell);
        }
    }

    /// IFN seen by the cell at `idx` when weighing an infection attempt.
    /// Local mode averages the field over the cell's influence area.
    fn infection_ifn(&self, idx: usize) -> f64 {
        match self.params.ifn_policy {
            IfnPolicy::Global => self.ifn_per_cell,
            IfnPolicy::Local => {
                let area = &self.topology.ifn_area[idx];
                if area.is_empty() {
                    return 0.0;
                }
                let sum: f64 = area.iter().map(|&n| self.grid.ifn[n as usize]).sum();
                sum / area.len() as f64
            }
            IfnPolicy::Disabled => 0.0,
        }
    }

    /// IFN driving antiviral induction: the cell's own concentration, not
    /// the area average.
    fn antiviral_ifn(&self, idx: usize) -> f64 {
        match self.params.ifn_policy {
            IfnPolicy::Global => self.ifn_per_cell,
            IfnPolicy::Local => self.grid.ifn[idx],
            IfnPolicy::Disabled => 0.0,
        }
    }

    /// Per-particle virion infection chance at the given effective IFN
    /// level. `r` is zero whenever virions do not stimulate IFN, so the
    /// unsuppressed branch also covers that case.
    fn virion_particle_chance(&self, effective_ifn: f64) -> f64 {
        let p = &self.params;
        if p.r == 0 || p.tau == 0 {
            p.rho
        } else {
            p.rho * (-p.alpha * effective_ifn / p.r as f64).exp()
        }
    }

    fn dip_particle_chance(&self, effective_ifn: f64) -> f64 {
        self.params.rho * (-self.params.alpha * effective_ifn).exp()
    }

    /// Antiviral progression and new infections for infectable tissue.
    ///
    /// Within a cell the antiviral transition is staged first and an
    /// infection decided in the same step overwrites it.
    fn evaluate_infections(&mut self) {
        for idx in 0..self.grid.area() {
            let state = self.grid.state[idx];

            let antiviral_candidate = matches!(
                state,
                CellState::Susceptible | CellState::Regrowth | CellState::InfectedDip
            );
            if antiviral_candidate && self.params.tau > 0 {
                self.advance_antiviral(idx, state);
            }

            if !matches!(state, CellState::Susceptible | CellState::Regrowth) {
                continue;
            }
            let virions = self.grid.virions[idx];
            let dips = self.grid.dips[idx];
            if virions == 0 && dips == 0 {
                continue;
            }

            let eff = self.infection_ifn(idx);
            let p_v = self.virion_particle_chance(eff);
            let p_d = self.dip_particle_chance(eff);
            let prob_v = 1.0 - (1.0 - p_v).powi(virions as i32);
            let prob_d = 1.0 - (1.0 - p_d).powi(dips as i32);
            let infected_v = self.rng.random::<f64>() <= prob_v;
            let infected_d = self.rng.random::<f64>() <= prob_d;

            let next = if infected_v && infected_d {
                CellState::InfectedBoth
            } else if infected_v {
                CellState::InfectedVirion
            } else if infected_d {
                CellState::InfectedDip
            } else {
                continue;
            };

            if infected_v {
                self.grid.time_infected[idx] = 0;
                self.grid.lysis_threshold[idx] = self.draw_lysis_threshold();
            }
            if infected_d {
                self.grid.time_infected_dip[idx] = 0;
            }
            self.grid.time_susceptible[idx] = TIMER_INACTIVE;
            self.grid.time_regrowth[idx] = TIMER_INACTIVE;
            self.grid.next_state[idx] = next;
            self.grid.state_changed[idx] = next != state;
        }
    }

    /// One cell's walk through the antiviral countdown: draw a duration on
    /// first IFN exposure, count steps of continued exposure, then convert.
    fn advance_antiviral(&mut self, idx: usize, state: CellState) {
        if self.grid.time_antiviral[idx] == TIMER_CONSUMED {
            return;
        }
        let local_ifn = self.antiviral_ifn(idx);
        if local_ifn <= 0.0 {
            return;
        }

        if self.grid.antiviral_duration[idx] < 0 {
            let dist = match self.antiviral_duration {
                Some(d) => d,
                None => return,
            };
            let duration = (self.rng.sample(dist) as i32).max(0);
            self.grid.antiviral_duration[idx] = duration;
            self.grid.time_antiviral[idx] = 0;
        } else if self.grid.time_antiviral[idx] <= self.grid.antiviral_duration[idx] {
            self.grid.time_antiviral[idx] += 1;
        } else {
            self.grid.previous_state[idx] = state;
            self.grid.next_state[idx] = CellState::Antiviral;
            self.grid.time_antiviral[idx] = TIMER_CONSUMED;
            self.counters.total_antiviral_time += self.grid.antiviral_duration[idx] as u64;
            if !self.grid.antiviral_counted[idx] {
                self.grid.antiviral_counted[idx] = true;
                self.counters.antiviral_cells += 1;
            }
            debug!(
                "cell {} entered antiviral state after {} steps",
                idx, self.grid.antiviral_duration[idx]
            );
        }
    }

    fn draw_lysis_threshold(&mut self) -> i32 {
        (self.rng.sample(self.lysis_delay) as i32).max(1)
    }

    /// Advances infection timers and fires lysis bursts. A lysing cell dies
    /// in both state buffers so later phases never treat it as infected.
    fn advance_lysis(&mut self) {
        for idx in 0..self.grid.area() {
            let state = self.grid.state[idx];
            if state != CellState::InfectedVirion && state != CellState::InfectedBoth {
                continue;
            }
            self.grid.time_infected[idx] += 1;
            if self.grid.lysis_threshold[idx] == TIMER_INACTIVE {
                // Seeded infections enter the grid without a drawn delay.
                self.grid.lysis_threshold[idx] = self.draw_lysis_threshold();
            }
            if self.grid.time_infected[idx] < self.grid.lysis_threshold[idx] {
                continue;
            }

            let origin_virions = self.grid.virions[idx];
            let origin_dips = self.grid.dips[idx];
            match state {
                CellState::InfectedVirion => self.counters.dead_from_virion += 1,
                _ => self.counters.dead_from_both += 1,
            }
            self.grid.state[idx] = CellState::Dead;
            self.grid.next_state[idx] = CellState::Dead;
            self.grid.time_dead[idx] = 0;
            self.grid.state_changed[idx] = true;

            dispersal::disperse_burst(
                &mut self.grid,
                &self.topology,
                &self.params,
                &mut self.counters,
                &mut self.rng,
                idx,
                origin_virions,
                origin_dips,
            );
        }
    }

    /// Singly-infected cells exposed to the other particle species may
    /// upgrade to co-infection. Cells already touched this step are skipped.
    fn evaluate_cross_infections(&mut self) {
        for idx in 0..self.grid.area() {
            let state = self.grid.state[idx];
            if state != CellState::InfectedVirion && state != CellState::InfectedDip {
                continue;
            }
            if self.grid.state_changed[idx] {
                continue;
            }
            let virions = self.grid.virions[idx];
            let dips = self.grid.dips[idx];
            if virions == 0 && dips == 0 {
                continue;
            }

            let eff = self.infection_ifn(idx);
            let prob_v = 1.0 - (1.0 - self.virion_particle_chance(eff)).powi(virions as i32);
            let prob_d = 1.0 - (1.0 - self.dip_particle_chance(eff)).powi(dips as i32);
            let infected_v = self.rng.random::<f64>() <= prob_v;
            let infected_d = self.rng.random::<f64>() <= prob_d;

            if state == CellState::InfectedVirion && infected_d {
                self.grid.next_state[idx] = CellState::InfectedBoth;
                self.grid.time_infected_dip[idx] = 0;
            } else if state == CellState::InfectedDip && infected_v {
                self.grid.next_state[idx] = CellState::InfectedBoth;
                self.grid.time_infected[idx] = 0;
                self.grid.lysis_threshold[idx] = self.draw_lysis_threshold();
            }
        }
    }

    /// Dead cells regrow after a stochastic delay, provided living tissue
    /// sits directly beside them.
    fn advance_regrowth(&mut self) {
        for idx in 0..self.grid.area() {
            if self.grid.state[idx] != CellState::Dead {
                continue;
            }
            if self.grid.time_dead[idx] == TIMER_INACTIVE {
                self.grid.time_dead[idx] = 0;
            }
            self.grid.time_dead[idx] += 1;

            let delay = self.rng.sample(self.regrowth_delay);
            if (self.grid.time_dead[idx] as f64) <= delay {
                continue;
            }
            let has_living_neighbor = self.topology.neighbors1[idx].iter().any(|&n| {
                matches!(
                    self.grid.state[n as usize],
                    CellState::Susceptible | CellState::Antiviral
                )
            });
            if !has_living_neighbor {
                continue;
            }

            self.grid.next_state[idx] = CellState::Regrowth;
            self.grid.reset_cell_timers(idx);
            self.grid.time_regrowth[idx] = 0;
            self.counters.regrowth_events += 1;
        }
    }

    /// Applies half-life decay to both particle species, rounding to the
    /// nearest whole particle so small pools drain to zero.
    fn decay_particles(&mut self) {
        for idx in 0..self.grid.area() {
            let v = self.grid.virions[idx];
            if v > 0 {
                self.grid.virions[idx] = (v as f64 * self.virion_decay + 0.5).floor() as u32;
            }
            let d = self.grid.dips[idx];
            if d > 0 {
                self.grid.dips[idx] = (d as f64 * self.dip_decay + 0.5).floor() as u32;
            }
        }
    }

    /// Collects this step's metrics row and, when due, a full grid snapshot.
    pub fn record(&mut self) {
        let row = metrics::collect(
            self.current_step,
            &self.grid,
            &self.counters,
            self.ifn_pool,
            self.max_ifn,
            &self.params,
        );
        self.recorded_metrics.push(row);

        let interval = self.config.output.snapshot_interval;
        if self.config.output.save_snapshots
            && interval > 0
            && self.current_step % interval == 0
        {
            self.recorded_snapshots
                .push(Snapshot::capture(self.current_step, &self.grid));
        }
    }

    pub fn metrics(&self) -> &[StepMetrics] {
        &self.recorded_metrics
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.recorded_snapshots
    }

    pub fn ifn_pool(&self) -> f64 {
        self.ifn_pool
    }
}

/// Places the initial particle load according to the seeding policy.
fn seed_particles(
    grid: &mut GridState,
    config: &SimulationConfig,
    params: &SimParams,
    rng: &mut StdRng,
) {
    let center = params.grid_size / 2;
    let row = config.seeding.seed_row.unwrap_or(center);
    let col = config.seeding.seed_col.unwrap_or(center);
    let seed_idx = row * params.grid_size + col;

    match config.seeding.policy {
        SeedingPolicy::CenterParticles => {
            grid.virions[seed_idx] += config.seeding.initial_virions;
            grid.dips[seed_idx] += config.seeding.initial_dips;
        }
        SeedingPolicy::CenterState => {
            let v = config.seeding.initial_virions;
            let d = config.seeding.initial_dips;
            grid.virions[seed_idx] += v;
            grid.dips[seed_idx] += d;
            let state = if v > 0 && d > 0 {
                CellState::InfectedBoth
            } else if v > 0 {
                CellState::InfectedVirion
            } else if d > 0 {
                CellState::InfectedDip
            } else {
                return;
            };
            grid.state[seed_idx] = state;
            grid.next_state[seed_idx] = state;
            if v > 0 {
                grid.time_infected[seed_idx] = 0;
            }
            if d > 0 {
                grid.time_infected_dip[seed_idx] = 0;
            }
            grid.time_susceptible[seed_idx] = TIMER_INACTIVE;
        }
        SeedingPolicy::Scatter => {
            let area = params.grid_area;
            for _ in 0..config.seeding.initial_virions {
                grid.virions[rng.random_range(0..area)] += 1;
            }
            for _ in 0..config.seeding.initial_dips {
                grid.dips[rng.random_range(0..area)] += 1;
            }
        }
    }
}
