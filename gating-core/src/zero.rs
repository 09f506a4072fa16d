//! Zero-channel handling for instruments with a detector floor.
//!
//! Events sitting exactly on an axis are kept out of the 2-D density and
//! binned into 1-D marginals instead. Peaks found in those marginals are
//! handed to the nearest 2-D peak, which then also gates the matching slice
//! of zero events.

use log::debug;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    density::{MarginalDensity, ZeroChannelDensity},
    geometry::Polygon,
    options::GatingOptions,
    peak::Peak,
};

/// The two zero-channel axes. `X` holds events whose X value is zero; they
/// lie along the left edge of the plot and are ranged by Y pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub enum ZeroAxis {
    X,
    Y,
}

/// A peak in a zero-channel marginal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct ZeroPeak {
    /// Pixel index of the maximum.
    pub position: usize,
    /// Inclusive pixel range of events attributed to this peak.
    pub cutoffs: [f64; 2],
}

/// Local maxima of `marginal` above `zero_peak_threshold` × its max. Each
/// peak's range extends outwards while the density keeps falling and stays
/// above the threshold.
pub fn find_zero_channel_peaks(marginal: &MarginalDensity, options: &GatingOptions) -> Vec<ZeroPeak> {
    if marginal.count < options.min_zero_channel_events() || !(marginal.max_density > 0.) {
        return vec![];
    }
    let values = &marginal.values;
    let threshold = options.zero_peak_threshold() * marginal.max_density;
    let n = values.len();
    let mut peaks = Vec::new();
    let mut i = 0;
    while i < n {
        // Treat a run of equal values as one candidate
        let mut j = i;
        while j + 1 < n && values[j + 1] == values[i] {
            j += 1;
        }
        let v = values[i];
        let rises_in = i == 0 || values[i - 1] < v;
        let falls_out = j + 1 == n || values[j + 1] < v;
        if v >= threshold && rises_in && falls_out {
            let mut lo = i;
            while lo > 0 && values[lo - 1] >= threshold && values[lo - 1] <= values[lo] {
                lo -= 1;
            }
            let mut hi = j;
            while hi + 1 < n && values[hi + 1] >= threshold && values[hi + 1] <= values[hi] {
                hi += 1;
            }
            peaks.push(ZeroPeak {
                position: (i + j) / 2,
                cutoffs: [lo as f64, hi as f64],
            });
        }
        i = j + 1;
    }
    peaks
}

/// How far `polygon` is from a zero-channel range: its distance from the
/// axis plus the gap between the range and the polygon's extent along it.
fn axis_distance(polygon: &Polygon, axis: ZeroAxis, cutoffs: &[f64; 2]) -> f64 {
    let bounds = polygon.bounds();
    let (from_axis, lo, hi) = match axis {
        ZeroAxis::X => (bounds.min.x, bounds.min.y, bounds.max.y),
        ZeroAxis::Y => (bounds.min.y, bounds.min.x, bounds.max.x),
    };
    let gap = (cutoffs[0] - hi).max(lo - cutoffs[1]).max(0.);
    from_axis.max(0.) + gap
}

fn claim(peak: &mut Peak, axis: ZeroAxis, cutoffs: [f64; 2]) {
    let (include, range) = match axis {
        ZeroAxis::X => (&mut peak.include_x_channel_zeroes, &mut peak.x_cutoffs),
        ZeroAxis::Y => (&mut peak.include_y_channel_zeroes, &mut peak.y_cutoffs),
    };
    *include = true;
    *range = Some(match *range {
        Some([lo, hi]) => [lo.min(cutoffs[0]), hi.max(cutoffs[1])],
        None => cutoffs,
    });
}

fn disabled(peak: &Peak, axis: ZeroAxis) -> bool {
    match axis {
        ZeroAxis::X => peak.disable_x_channel_zeroes,
        ZeroAxis::Y => peak.disable_y_channel_zeroes,
    }
}

/// Give each zero-channel range to the closest peak along its axis.
///
/// Every peak's inclusion flags and ranges are reset first, so running this
/// twice on the same input gives the same result.
pub fn expand_zero_channels(peaks: &mut [Peak], zero_channels: &ZeroChannelDensity, options: &GatingOptions) {
    for peak in peaks.iter_mut() {
        peak.include_x_channel_zeroes = false;
        peak.x_cutoffs = None;
        peak.include_y_channel_zeroes = false;
        peak.y_cutoffs = None;
    }
    if !options.zero_channels_enabled() || peaks.is_empty() {
        return;
    }
    for (axis, marginal) in [(ZeroAxis::X, &zero_channels.x_zero), (ZeroAxis::Y, &zero_channels.y_zero)] {
        for zero_peak in find_zero_channel_peaks(marginal, options) {
            let closest = peaks
                .iter()
                .enumerate()
                .min_by_key(|(idx, peak)| {
                    (OrderedFloat(axis_distance(peak.rendered_polygon(), axis, &zero_peak.cutoffs)), *idx)
                })
                .map(|(idx, _)| idx);
            let Some(idx) = closest else { continue };
            let peak = &mut peaks[idx];
            if disabled(peak, axis) {
                debug!("zero channel {:?} range {:?}: closest peak {} has it disabled", axis, zero_peak.cutoffs, peak.id);
                continue;
            }
            debug!("zero channel {:?} range {:?} -> peak {}", axis, zero_peak.cutoffs, peak.id);
            claim(peak, axis, zero_peak.cutoffs);
        }
    }
}
