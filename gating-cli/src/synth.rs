//! Synthetic clustered samples for demos and tests.

use std::f64::consts::TAU;

use rand::{rngs::StdRng, Rng, SeedableRng};

use gating_core::{AxisScale, Event, GatingOptions, MachineType, PipelineJob, PlotScales};

#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub sample_id: String,
    pub clusters: usize,
    pub events_per_cluster: usize,
    /// Standard deviation of each cluster, in raw units.
    pub spread: f64,
    pub seed: u64,
    /// Push a share of events onto the axes, as a detector floor would.
    pub mass_cytometry: bool,
    /// Written into the job's options when set.
    pub min_peak_size: Option<f64>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        SynthConfig {
            sample_id: "synthetic".to_string(),
            clusters: 2,
            events_per_cluster: 5000,
            spread: 30.,
            seed: 0,
            mass_cytometry: false,
            min_peak_size: None,
        }
    }
}

/// Raw range of both synthetic axes.
pub const RAW_MAX: f64 = 1000.;

fn gaussian(rng: &mut StdRng) -> f64 {
    // Box-Muller
    let u1: f64 = rng.gen_range(f64::EPSILON..1.);
    let u2: f64 = rng.gen();
    (-2. * u1.ln()).sqrt() * (TAU * u2).cos()
}

fn round2(v: f64) -> f64 {
    (v * 100.).round() / 100.
}

/// Cluster centres on a circle around the middle of the plot.
pub fn centres(clusters: usize) -> Vec<(f64, f64)> {
    let mid = RAW_MAX / 2.;
    if clusters == 1 {
        return vec![(mid, mid)];
    }
    (0..clusters)
        .map(|i| {
            let theta = TAU * i as f64 / clusters as f64;
            (mid + 0.3 * RAW_MAX * theta.cos(), mid + 0.3 * RAW_MAX * theta.sin())
        })
        .collect()
}

/// A job gating `config.clusters` Gaussian clusters on a 200×150 plot.
pub fn synthesize(config: &SynthConfig) -> PipelineJob {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut events = Vec::with_capacity(config.clusters * config.events_per_cluster);
    for (cx, cy) in centres(config.clusters) {
        for _ in 0..config.events_per_cluster {
            let mut x = round2((cx + config.spread * gaussian(&mut rng)).clamp(0., RAW_MAX));
            let mut y = round2((cy + config.spread * gaussian(&mut rng)).clamp(0., RAW_MAX));
            if config.mass_cytometry {
                match rng.gen_range(0..100) {
                    0..=4 => x = 0.,
                    5..=9 => y = 0.,
                    10 => (x, y) = (0., 0.),
                    _ => {}
                }
            }
            events.push(Event::new(events.len() as u64, x, y));
        }
    }
    let machine_type = if config.mass_cytometry { MachineType::MassCytometry } else { MachineType::Fluorescence };
    let (width, height) = (GatingOptions::DEFAULT_PLOT_WIDTH, GatingOptions::DEFAULT_PLOT_HEIGHT);
    let mut options = GatingOptions::new(width, height).with_machine_type(machine_type);
    if let Some(min_peak_size) = config.min_peak_size {
        options = options.with_min_peak_size(min_peak_size);
    }
    PipelineJob {
        sample_id: config.sample_id.clone(),
        x_parameter: 0,
        y_parameter: 1,
        events,
        scales: PlotScales {
            x: AxisScale::Linear { min: 0., max: RAW_MAX },
            y: AxisScale::Linear { min: 0., max: RAW_MAX },
            width,
            height,
        },
        options,
        known_nuclei: vec![],
        template_group: None,
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn deterministic_per_seed() {
        let config = SynthConfig { events_per_cluster: 50, ..SynthConfig::default() };
        assert_eq!(synthesize(&config), synthesize(&config));
        let other = synthesize(&SynthConfig { seed: 1, ..config.clone() });
        assert_ne!(other.events, synthesize(&config).events);
    }

    #[test]
    fn mass_cytometry_puts_events_on_axes() {
        let job = synthesize(&SynthConfig { mass_cytometry: true, ..SynthConfig::default() });
        let x_zero = job.events.iter().filter(|e| e.is_x_zero()).count();
        assert!(x_zero > 300 && x_zero < 900, "{x_zero}");
        assert_eq!(job.options.machine_type, MachineType::MassCytometry);
    }

    #[test]
    fn synthetic_clusters_gate_cleanly() {
        let job = synthesize(&SynthConfig { min_peak_size: Some(300.), ..SynthConfig::default() });
        let output = gating_core::run_pipeline(&job).unwrap();
        assert!(output.is_success(), "{:?}", output.criteria);
        assert_eq!(output.peaks.len(), 2);
    }
}
