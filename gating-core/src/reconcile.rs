use log::info;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    density::ZeroChannelDensity,
    geometry::Polygon,
    options::GatingOptions,
    peak::{Peak, PeakId},
    zero::expand_zero_channels,
    zipper::zip,
};

/// A peak's gate boundary after zero-channel expansion and overlap
/// resolution, in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct FinalPolygon {
    pub peak_id: PeakId,
    pub template_id: Option<String>,
    pub polygon: Polygon,
    pub include_x_channel_zeroes: bool,
    pub x_cutoffs: Option<[f64; 2]>,
    pub include_y_channel_zeroes: bool,
    pub y_cutoffs: Option<[f64; 2]>,
}

impl FinalPolygon {
    /// Whether an X-zero event at Y pixel `y` belongs to this gate.
    pub fn includes_x_zero(&self, y: f64) -> bool {
        self.include_x_channel_zeroes && self.x_cutoffs.is_some_and(|[lo, hi]| lo <= y && y <= hi)
    }

    /// Whether a Y-zero event at X pixel `x` belongs to this gate.
    pub fn includes_y_zero(&self, x: f64) -> bool {
        self.include_y_channel_zeroes && self.y_cutoffs.is_some_and(|[lo, hi]| lo <= x && x <= hi)
    }
}

/// Turn sibling peaks into final gate polygons.
///
/// Zero-channel ranges are assigned first (mass cytometry only; otherwise all
/// inclusion flags are cleared), then the zipper makes the polygons disjoint
/// and splices axis edges onto those including zero events. The peaks keep
/// the resulting flags and ranges.
pub fn reconcile_polygons(
    peaks: &mut [Peak],
    zero_channels: Option<&ZeroChannelDensity>,
    options: &GatingOptions,
) -> Vec<FinalPolygon> {
    match zero_channels {
        Some(zero_channels) => expand_zero_channels(peaks, zero_channels, options),
        None => {
            for peak in peaks.iter_mut() {
                peak.include_x_channel_zeroes = false;
                peak.x_cutoffs = None;
                peak.include_y_channel_zeroes = false;
                peak.y_cutoffs = None;
            }
        }
    }
    let polygons = zip(peaks);
    info!(
        "reconcile_polygons: {} polygons, {} including zero events",
        polygons.len(),
        peaks.iter().filter(|p| p.include_x_channel_zeroes || p.include_y_channel_zeroes).count(),
    );
    peaks
        .iter()
        .zip(polygons)
        .map(|(peak, polygon)| FinalPolygon {
            peak_id: peak.id,
            template_id: peak.template_id.clone(),
            polygon,
            include_x_channel_zeroes: peak.include_x_channel_zeroes,
            x_cutoffs: peak.x_cutoffs,
            include_y_channel_zeroes: peak.include_y_channel_zeroes,
            y_cutoffs: peak.y_cutoffs,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        density::MarginalDensity,
        geometry::R2,
        options::MachineType,
    };

    fn block(id: u32, x0: usize, y0: usize, w: usize, h: usize) -> Peak {
        let mut peak = Peak::from_cell(PeakId(id), R2 { x: x0, y: y0 });
        let cells: Vec<R2<usize>> = (y0..y0 + h)
            .flat_map(|y| (x0..x0 + w).map(move |x| R2 { x, y }))
            .collect();
        peak.grow(&cells);
        peak.promote();
        peak.nucleus = R2::new((x0 + w / 2) as f64, (y0 + h / 2) as f64);
        peak
    }

    fn zero_channels() -> ZeroChannelDensity {
        let mut x_zero = vec![0.; 150];
        for (i, v) in x_zero.iter_mut().enumerate().take(50).skip(30) {
            *v = 10. - (i as f64 - 40.).abs() / 2.;
        }
        ZeroChannelDensity {
            x_zero: MarginalDensity { values: x_zero, max_density: 10., count: 500 },
            y_zero: MarginalDensity { values: vec![0.; 200], max_density: 0., count: 0 },
            double_zero_count: 0,
        }
    }

    #[test]
    fn sibling_polygons_are_disjoint() {
        let mut peaks = vec![block(1, 20, 20, 30, 30), block(2, 40, 20, 30, 30)];
        let options = GatingOptions::new(200, 150);
        let polygons = reconcile_polygons(&mut peaks, None, &options);
        assert_eq!(polygons.len(), 2);
        let [a, b] = [&polygons[0].polygon, &polygons[1].polygon];
        assert!(!b.contains(&R2::new(44., 35.)));
        assert!(!a.contains(&R2::new(46., 35.)));
        assert!(a.contains(&R2::new(25., 35.)));
        assert!(b.contains(&R2::new(65., 35.)));
    }

    #[test]
    fn mass_cytometry_polygons_reach_zero_axis() {
        let mut peaks = vec![block(1, 10, 30, 20, 20), block(2, 120, 100, 20, 20)];
        let options = GatingOptions::new(200, 150).with_machine_type(MachineType::MassCytometry);
        let polygons = reconcile_polygons(&mut peaks, Some(&zero_channels()), &options);
        assert!(polygons[0].include_x_channel_zeroes);
        assert_eq!(polygons[0].x_cutoffs, Some([30., 49.]));
        assert!(polygons[0].polygon.bounds().min.x.abs() < 1e-9);
        assert!(polygons[0].includes_x_zero(40.));
        assert!(!polygons[0].includes_x_zero(60.));
        assert!(!polygons[1].include_x_channel_zeroes);
        assert!(peaks[0].include_x_channel_zeroes);
    }

    #[test]
    fn reconciling_twice_is_stable() {
        let mut peaks = vec![block(1, 10, 30, 20, 20), block(2, 120, 100, 20, 20)];
        let options = GatingOptions::new(200, 150).with_machine_type(MachineType::MassCytometry);
        let first = reconcile_polygons(&mut peaks, Some(&zero_channels()), &options);
        let second = reconcile_polygons(&mut peaks, Some(&zero_channels()), &options);
        assert_eq!(first, second);
    }
}
