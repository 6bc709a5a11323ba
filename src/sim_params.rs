use crate::config::{DispersalPolicy, IfnPolicy};

/// Flat, pre-derived runtime parameters. Built once from the configuration
/// and handed to every phase of the step loop.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub grid_size: usize,
    pub grid_area: usize,
    pub time_steps: u32,

    pub dispersal: DispersalPolicy,
    pub jump_radius_virion: usize,
    pub jump_radius_dip: usize,
    pub partition_fraction: f64,

    pub ifn_policy: IfnPolicy,
    pub ifn_wave_radius: usize,
    pub ifn_enabled: bool,
    /// Infection-suppression exponent scale.
    pub alpha: f64,
    /// Mean antiviral duration; zero disables the antiviral pathway.
    pub tau: i32,
    /// Virion IFN stimulation rate (zero when virions do not stimulate).
    pub r: i32,
    pub virion_stimulates_ifn: bool,
    pub ifn_both_fold: f64,
    /// IFN units produced per step by DIP-only infected cells.
    pub dip_only_stimulate: f64,
    /// IFN units produced per step by co-infected cells on top of `r`.
    pub both_stimulate: f64,
    pub ifn_delay: i32,
    pub std_ifn_delay: f64,
    pub ifn_half_life: f64,
    /// Concentrations below this are flushed to zero during decay.
    pub ifn_floor: f64,

    pub rho: f64,
    pub burst_size_virion: u32,
    pub burst_size_dip: u32,
    pub mean_lysis_time: f64,
    pub std_lysis_time: f64,
    pub virion_half_life: f64,
    pub dip_half_life: f64,
    pub regrowth_mean: f64,
    pub regrowth_std: f64,
}

impl SimParams {
    /// Per-step retention factor for an exponentially decaying species.
    pub fn half_life_factor(half_life: f64) -> f64 {
        if half_life <= 0.0 {
            1.0
        } else {
            0.5_f64.powf(1.0 / half_life)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_life_factor_halves_after_half_life_steps() {
        let factor = SimParams::half_life_factor(3.2);
        let after = factor.powf(3.2);
        assert!((after - 0.5).abs() < 1e-12);
    }

    #[test]
    fn zero_half_life_means_no_decay() {
        assert_eq!(SimParams::half_life_factor(0.0), 1.0);
    }
}
