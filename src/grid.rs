use serde::{Deserialize, Serialize};

/// Life-cycle state of a single lattice cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CellState {
    Susceptible = 0,
    InfectedVirion = 1,
    InfectedDip = 2,
    InfectedBoth = 3,
    Dead = 4,
    Antiviral = 5,
    Regrowth = 6,
}

/// Timer value meaning "not running".
pub const TIMER_INACTIVE: i32 = -1;
/// Timer value meaning "ran once and must not run again".
pub const TIMER_CONSUMED: i32 = -2;

/// Structure-of-arrays grid state. All per-cell vectors are indexed by flat
/// index `row * size + col`.
///
/// `state` is the committed state read during a step; phases write into
/// `next_state`, which is committed before regrowth results become visible
/// to the following step.
pub struct GridState {
    pub size: usize,

    pub state: Vec<CellState>,
    pub next_state: Vec<CellState>,

    pub virions: Vec<u32>,
    pub dips: Vec<u32>,
    pub ifn: Vec<f64>,

    /// Steps since virion infection (drives lysis and IFN gating).
    pub time_infected: Vec<i32>,
    /// Steps since DIP infection (drives DIP IFN gating).
    pub time_infected_dip: Vec<i32>,
    pub time_dead: Vec<i32>,
    pub time_regrowth: Vec<i32>,
    pub time_susceptible: Vec<i32>,
    pub time_antiviral: Vec<i32>,

    /// Per-cell lysis delay drawn at infection; TIMER_INACTIVE until drawn.
    pub lysis_threshold: Vec<i32>,
    /// Per-cell antiviral duration drawn on first IFN exposure.
    pub antiviral_duration: Vec<i32>,

    /// State a cell held before entering ANTIVIRAL, restored on expiry.
    pub previous_state: Vec<CellState>,
    /// Set when the infection phase changed a cell this step; guards the
    /// cross-infection phase against double-processing.
    pub state_changed: Vec<bool>,
    /// Whether the cell has already been counted in the antiviral tally.
    pub antiviral_counted: Vec<bool>,
}

impl GridState {
    pub fn new(size: usize) -> Self {
        let area = size * size;
        GridState {
            size,
            state: vec![CellState::Susceptible; area],
            next_state: vec![CellState::Susceptible; area],
            virions: vec![0; area],
            dips: vec![0; area],
            ifn: vec![0.0; area],
            time_infected: vec![TIMER_INACTIVE; area],
            time_infected_dip: vec![TIMER_INACTIVE; area],
            time_dead: vec![TIMER_INACTIVE; area],
            time_regrowth: vec![TIMER_INACTIVE; area],
            time_susceptible: vec![0; area],
            time_antiviral: vec![TIMER_INACTIVE; area],
            lysis_threshold: vec![TIMER_INACTIVE; area],
            antiviral_duration: vec![TIMER_INACTIVE; area],
            previous_state: vec![CellState::Susceptible; area],
            state_changed: vec![false; area],
            antiviral_counted: vec![false; area],
        }
    }

    pub fn area(&self) -> usize {
        self.size * self.size
    }

    /// Copies the staged states into the committed buffer.
    pub fn commit(&mut self) {
        self.state.copy_from_slice(&self.next_state);
    }

    /// Resets every per-cell timer and bookkeeping slot for a cell that has
    /// just become infectable tissue again.
    pub fn reset_cell_timers(&mut self, idx: usize) {
        self.time_infected[idx] = TIMER_INACTIVE;
        self.time_infected_dip[idx] = TIMER_INACTIVE;
        self.time_dead[idx] = TIMER_INACTIVE;
        self.time_antiviral[idx] = TIMER_INACTIVE;
        self.lysis_threshold[idx] = TIMER_INACTIVE;
        self.antiviral_duration[idx] = TIMER_INACTIVE;
        self.antiviral_counted[idx] = false;
    }
}
