pub mod config;
pub mod dispersal;
pub mod grid;
pub mod metrics;
pub mod sim_params;
pub mod simulation;
pub mod topology;

pub use config::{DispersalPolicy, IfnPolicy, SeedingPolicy, SimulationConfig};
pub use grid::{CellState, GridState};
pub use metrics::{SimCounters, Snapshot, StepMetrics};
pub use simulation::Simulation;
