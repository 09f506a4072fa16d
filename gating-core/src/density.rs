//! Grid density estimation.
//!
//! Events are binned into pixel cells, then smoothed with linear-decay sweeps:
//! every sweep carries a `heat` value along a row or column that is bumped by
//! each non-empty cell and decays back to zero over `density_width` pixels.
//! Horizontal sweeps run over the raw counts and vertical sweeps over their
//! result, giving a separable blur whose cost is linear in the grid size.
//! A final pass averages each cell with its diagonal neighbours.

use log::debug;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    error::{GatingError, Result},
    event::{Event, PlotScales},
    geometry::R2,
    options::GatingOptions,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct DensityGrid {
    pub width: usize,
    pub height: usize,
    /// Row-major, `values[y * width + x]`.
    pub values: Vec<f64>,
    pub max_density: f64,
    pub zero_channels: Option<ZeroChannelDensity>,
}

/// 1-D density of events sitting on one axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct MarginalDensity {
    pub values: Vec<f64>,
    pub max_density: f64,
    /// Number of events that went into this marginal.
    pub count: usize,
}

/// Marginals for detector-floor events.
///
/// `x_zero` holds events whose X value is exactly 0, indexed by Y pixel;
/// `y_zero` holds events whose Y value is exactly 0, indexed by X pixel.
/// Events zero on both axes are only counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct ZeroChannelDensity {
    pub x_zero: MarginalDensity,
    pub y_zero: MarginalDensity,
    pub double_zero_count: usize,
}

impl DensityGrid {
    /// Wrap precomputed row-major values.
    pub fn from_values(width: usize, height: usize, values: Vec<f64>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GatingError::InvalidDimensions { width, height });
        }
        if values.len() != width * height {
            return Err(GatingError::GridShape { width, height, actual: values.len() });
        }
        let max_density = max_of(&values);
        Ok(DensityGrid { width, height, values, max_density, zero_channels: None })
    }

    pub fn get(&self, x: usize, y: usize) -> f64 {
        self.values[y * self.width + x]
    }

    /// All cells with their density, row by row.
    pub fn cells(&self) -> impl Iterator<Item = (R2<usize>, f64)> + '_ {
        self.values.iter().enumerate().map(move |(i, v)| {
            (R2 { x: i % self.width, y: i / self.width }, *v)
        })
    }

    pub fn is_empty(&self) -> bool {
        !(self.max_density > 0.)
    }
}

impl MarginalDensity {
    fn from_counts(counts: Vec<f64>, count: usize, density_width: f64) -> Self {
        let values = smooth_1d(&counts, density_width);
        let max_density = max_of(&values);
        MarginalDensity { values, max_density, count }
    }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(0., f64::max)
}

/// Bin `events` onto a `scales.width` × `scales.height` grid and smooth.
///
/// For mass cytometry, events lying exactly on an axis are routed into the
/// zero-channel marginals instead of the 2-D grid.
pub fn estimate_density(events: &[Event], scales: &PlotScales, options: &GatingOptions) -> Result<DensityGrid> {
    let (width, height) = (scales.width, scales.height);
    if width == 0 || height == 0 {
        return Err(GatingError::InvalidDimensions { width, height });
    }
    if events.is_empty() {
        return Err(GatingError::EmptyPopulation);
    }
    let density_width = options.density_width();
    let split_zeroes = options.zero_channels_enabled();

    let mut counts = vec![0.; width * height];
    let mut x_zero = vec![0.; height];
    let mut y_zero = vec![0.; width];
    let (mut n_x_zero, mut n_y_zero, mut n_double_zero) = (0, 0, 0);

    for event in events {
        let cell = scales.cell(event);
        if split_zeroes {
            match (event.is_x_zero(), event.is_y_zero()) {
                (true, true) => {
                    n_double_zero += 1;
                    continue;
                }
                (true, false) => {
                    x_zero[cell.y] += 1.;
                    n_x_zero += 1;
                    continue;
                }
                (false, true) => {
                    y_zero[cell.x] += 1.;
                    n_y_zero += 1;
                    continue;
                }
                (false, false) => {}
            }
        }
        counts[cell.y * width + cell.x] += 1.;
    }

    let values = smooth_2d(&counts, width, height, density_width);
    let max_density = max_of(&values);
    let zero_channels = split_zeroes.then(|| ZeroChannelDensity {
        x_zero: MarginalDensity::from_counts(x_zero, n_x_zero, density_width),
        y_zero: MarginalDensity::from_counts(y_zero, n_y_zero, density_width),
        double_zero_count: n_double_zero,
    });
    debug!(
        "estimate_density: {} events on {}x{}, max density {:.3}, zero channels x={} y={} both={}",
        events.len(), width, height, max_density, n_x_zero, n_y_zero, n_double_zero,
    );

    Ok(DensityGrid { width, height, values, max_density, zero_channels })
}

/// One linear-decay sweep along the cells named by `idxs`, accumulating into
/// `dst`.
fn sweep(src: &[f64], dst: &mut [f64], idxs: impl Iterator<Item = usize>, density_width: f64) {
    let mut heat = 0.;
    let mut decay = 0.;
    for i in idxs {
        let v = src[i];
        if v > 0. {
            heat += v;
            decay = heat / density_width;
        }
        dst[i] += heat;
        heat = (heat - decay).max(0.);
    }
}

fn smooth_2d(counts: &[f64], width: usize, height: usize, density_width: f64) -> Vec<f64> {
    let mut horizontal = vec![0.; counts.len()];
    for y in 0..height {
        let row = y * width;
        sweep(counts, &mut horizontal, row..row + width, density_width);
        sweep(counts, &mut horizontal, (row..row + width).rev(), density_width);
    }

    let mut vertical = vec![0.; counts.len()];
    for x in 0..width {
        let column = (0..height).map(|y| y * width + x);
        sweep(&horizontal, &mut vertical, column.clone(), density_width);
        sweep(&horizontal, &mut vertical, column.rev(), density_width);
    }

    // Diagonal-neighbour average
    let mut out = vec![0.; counts.len()];
    for y in 0..height {
        for x in 0..width {
            let mut sum = vertical[y * width + x];
            let mut n = 1.;
            for (dx, dy) in [(-1i64, -1i64), (1, -1), (-1, 1), (1, 1)] {
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && ny >= 0 && (nx as usize) < width && (ny as usize) < height {
                    sum += vertical[ny as usize * width + nx as usize];
                    n += 1.;
                }
            }
            out[y * width + x] = sum / n;
        }
    }
    out
}

fn smooth_1d(counts: &[f64], density_width: f64) -> Vec<f64> {
    let n = counts.len();
    let mut swept = vec![0.; n];
    sweep(counts, &mut swept, 0..n, density_width);
    sweep(counts, &mut swept, (0..n).rev(), density_width);

    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            let window = &swept[lo..=hi];
            window.iter().sum::<f64>() / window.len() as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;
    use crate::{options::MachineType, scale::AxisScale};

    fn scales(width: usize, height: usize) -> PlotScales {
        PlotScales {
            x: AxisScale::Linear { min: 0., max: (width - 1) as f64 },
            y: AxisScale::Linear { min: 0., max: (height - 1) as f64 },
            width,
            height,
        }
    }

    #[test]
    fn single_point_decays_monotonically() {
        let events = vec![Event::new(0, 20., 20.)];
        let options = GatingOptions::new(41, 41);
        let grid = estimate_density(&events, &scales(41, 41), &options).unwrap();
        assert!(grid.max_density > 0.);
        // Peak at the point, decaying outward along the row
        let mut prev = grid.get(20, 20);
        assert_relative_eq!(prev, grid.max_density);
        for x in 21..30 {
            let v = grid.get(x, 20);
            assert!(v <= prev, "density increased at x={x}: {v} > {prev}");
            prev = v;
        }
        assert_eq!(grid.get(0, 0), 0.);
        assert!(grid.zero_channels.is_none());
    }

    #[test]
    fn out_of_bounds_events_are_clamped_not_dropped() {
        let events = vec![Event::new(0, -100., -100.), Event::new(1, 1e9, 1e9)];
        let options = GatingOptions::new(10, 10);
        let grid = estimate_density(&events, &scales(10, 10), &options).unwrap();
        assert!(grid.get(0, 0) > 0.);
        assert!(grid.get(9, 9) > 0.);
    }

    #[test]
    fn empty_population_is_an_error() {
        let options = GatingOptions::new(10, 10);
        assert_eq!(
            estimate_density(&[], &scales(10, 10), &options),
            Err(GatingError::EmptyPopulation),
        );
    }

    #[test]
    fn mass_cytometry_routes_zero_events_to_marginals() {
        let events = vec![
            Event::new(0, 0., 5.),
            Event::new(1, 0., 5.),
            Event::new(2, 3., 0.),
            Event::new(3, 0., 0.),
            Event::new(4, 7., 7.),
        ];
        let options = GatingOptions::new(10, 10).with_machine_type(MachineType::MassCytometry);
        let grid = estimate_density(&events, &scales(10, 10), &options).unwrap();
        let zero = grid.zero_channels.as_ref().unwrap();
        assert_eq!(zero.x_zero.count, 2);
        assert_eq!(zero.y_zero.count, 1);
        assert_eq!(zero.double_zero_count, 1);
        assert_eq!(zero.x_zero.values.len(), 10);
        assert_eq!(zero.y_zero.values.len(), 10);
        assert!(zero.x_zero.values[5] > zero.x_zero.values[0]);
        // Only the (7, 7) event lands in the 2-D grid
        assert_eq!(grid.get(0, 5), 0.);
        assert_relative_eq!(grid.max_density, grid.get(7, 7));
    }

    #[test]
    fn from_values_checks_shape() {
        assert!(matches!(
            DensityGrid::from_values(3, 3, vec![0.; 8]),
            Err(GatingError::GridShape { actual: 8, .. }),
        ));
        let grid = DensityGrid::from_values(2, 1, vec![1., 4.]).unwrap();
        assert_eq!(grid.max_density, 4.);
    }
}
