//! Tuning knobs for a gating run.
//!
//! Every threshold is optional in serialized form; unset values resolve to
//! defaults derived from the plot dimensions, so a template group or a host
//! UI only needs to store what the user actually changed.

use serde::{Deserialize, Serialize};
use tsify::Tsify;

/// Cytometer family. Only mass cytometry produces detector-floor zeros that
/// need the zero-channel handling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub enum MachineType {
    #[default]
    Fluorescence,
    MassCytometry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct GatingOptions {
    #[serde(default = "default_plot_width")]
    pub plot_width: usize,
    #[serde(default = "default_plot_height")]
    pub plot_height: usize,
    #[serde(default)]
    pub machine_type: MachineType,
    /// Max distance (pixels) at which a cell attaches to a peak, and at
    /// which two peaks are considered touching.
    #[serde(default)]
    pub edge_distance: Option<f64>,
    /// Iterations (percent of max density) a peak must survive unmerged.
    #[serde(default)]
    pub min_peak_height: Option<f64>,
    /// Minimum hull area (square pixels) of a true peak.
    #[serde(default)]
    pub min_peak_size: Option<f64>,
    /// Decay length (pixels) of the density smoothing sweeps.
    #[serde(default)]
    pub density_width: Option<f64>,
    /// Fraction of the plot dimension within which nuclei share an axis group.
    #[serde(default)]
    pub group_distance_ratio: Option<f64>,
    #[serde(default)]
    pub default_boundary_offset: Option<usize>,
    /// Radius (pixels) of the seed circle for known nuclei.
    #[serde(default)]
    pub known_peak_radius: Option<f64>,
    /// Fraction of a marginal's max below which 1-D peaks end.
    #[serde(default)]
    pub zero_peak_threshold: Option<f64>,
    #[serde(default)]
    pub min_zero_channel_events: Option<usize>,
}

fn default_plot_width() -> usize {
    GatingOptions::DEFAULT_PLOT_WIDTH
}

fn default_plot_height() -> usize {
    GatingOptions::DEFAULT_PLOT_HEIGHT
}

impl Default for GatingOptions {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PLOT_WIDTH, Self::DEFAULT_PLOT_HEIGHT)
    }
}

impl GatingOptions {
    pub const DEFAULT_PLOT_WIDTH: usize = 200;
    pub const DEFAULT_PLOT_HEIGHT: usize = 150;
    pub const DEFAULT_MIN_PEAK_SIZE: f64 = 5000.;
    pub const DEFAULT_GROUP_DISTANCE_RATIO: f64 = 0.3;
    pub const DEFAULT_BOUNDARY_OFFSET: usize = 10;
    pub const DEFAULT_ZERO_PEAK_THRESHOLD: f64 = 0.1;
    pub const DEFAULT_MIN_ZERO_CHANNEL_EVENTS: usize = 20;

    pub fn new(plot_width: usize, plot_height: usize) -> Self {
        Self {
            plot_width,
            plot_height,
            machine_type: MachineType::default(),
            edge_distance: None,
            min_peak_height: None,
            min_peak_size: None,
            density_width: None,
            group_distance_ratio: None,
            default_boundary_offset: None,
            known_peak_radius: None,
            zero_peak_threshold: None,
            min_zero_channel_events: None,
        }
    }

    pub fn with_machine_type(mut self, machine_type: MachineType) -> Self {
        self.machine_type = machine_type;
        self
    }

    pub fn with_min_peak_size(mut self, min_peak_size: f64) -> Self {
        self.min_peak_size = Some(min_peak_size);
        self
    }

    pub fn with_min_peak_height(mut self, min_peak_height: f64) -> Self {
        self.min_peak_height = Some(min_peak_height);
        self
    }

    pub fn with_edge_distance(mut self, edge_distance: f64) -> Self {
        self.edge_distance = Some(edge_distance);
        self
    }

    /// Defaults to 5% of the plot width.
    pub fn edge_distance(&self) -> f64 {
        self.edge_distance.unwrap_or(self.plot_width as f64 * 0.05)
    }

    /// Defaults to 4% of the plot height.
    pub fn min_peak_height(&self) -> f64 {
        self.min_peak_height.unwrap_or(self.plot_height as f64 * 0.04)
    }

    pub fn min_peak_size(&self) -> f64 {
        self.min_peak_size.unwrap_or(Self::DEFAULT_MIN_PEAK_SIZE)
    }

    /// Defaults to 2.5% of the larger plot dimension, at least 2 pixels.
    pub fn density_width(&self) -> f64 {
        self.density_width
            .unwrap_or_else(|| (self.plot_width.max(self.plot_height) as f64 * 0.025).max(2.))
    }

    pub fn group_distance_ratio(&self) -> f64 {
        self.group_distance_ratio.unwrap_or(Self::DEFAULT_GROUP_DISTANCE_RATIO)
    }

    pub fn default_boundary_offset(&self) -> usize {
        self.default_boundary_offset.unwrap_or(Self::DEFAULT_BOUNDARY_OFFSET)
    }

    /// Defaults to 2.5% of the plot width, at least 2 pixels.
    pub fn known_peak_radius(&self) -> f64 {
        self.known_peak_radius
            .unwrap_or_else(|| (self.plot_width as f64 * 0.025).max(2.))
    }

    pub fn zero_peak_threshold(&self) -> f64 {
        self.zero_peak_threshold.unwrap_or(Self::DEFAULT_ZERO_PEAK_THRESHOLD)
    }

    pub fn min_zero_channel_events(&self) -> usize {
        self.min_zero_channel_events
            .unwrap_or(Self::DEFAULT_MIN_ZERO_CHANNEL_EVENTS)
    }

    pub fn zero_channels_enabled(&self) -> bool {
        self.machine_type == MachineType::MassCytometry
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn defaults_follow_plot_dimensions() {
        let options = GatingOptions::new(200, 150);
        assert_relative_eq!(options.edge_distance(), 10.);
        assert_relative_eq!(options.min_peak_height(), 6.);
        assert_relative_eq!(options.min_peak_size(), 5000.);
        assert!(!options.zero_channels_enabled());
    }

    #[test]
    fn deserializes_camel_case_with_partial_keys() {
        let options: GatingOptions = serde_json::from_str(
            r#"{ "plotWidth": 400, "machineType": "massCytometry", "minPeakSize": 250 }"#,
        )
        .unwrap();
        assert_eq!(options.plot_width, 400);
        assert_eq!(options.plot_height, GatingOptions::DEFAULT_PLOT_HEIGHT);
        assert_eq!(options.machine_type, MachineType::MassCytometry);
        assert_relative_eq!(options.min_peak_size(), 250.);
        assert_relative_eq!(options.edge_distance(), 20.);
    }
}
