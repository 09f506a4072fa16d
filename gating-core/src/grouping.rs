//! Positional addressing of peaks.
//!
//! Peak ids change on every run, so peaks are compared across samples by
//! where their nuclei sit instead: "second group along X, first along Y".

use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    options::GatingOptions,
    peak::{Peak, PeakId},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct AxisGroup {
    /// Mean nucleus coordinate of the members.
    pub position: f64,
    pub peak_ids: Vec<PeakId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
pub struct AxisGroups {
    pub x: Vec<AxisGroup>,
    pub y: Vec<AxisGroup>,
}

/// Bucket `(id, coordinate)` pairs into ascending groups. A coordinate joins
/// the last group when within `max_distance` of its running mean.
pub fn group_axis(points: impl IntoIterator<Item = (PeakId, f64)>, max_distance: f64) -> Vec<AxisGroup> {
    let mut groups: Vec<AxisGroup> = Vec::new();
    for (id, position) in points
        .into_iter()
        .sorted_by_key(|(id, position)| (OrderedFloat(*position), *id))
    {
        match groups.last_mut() {
            Some(group) if (position - group.position).abs() <= max_distance => {
                let n = group.peak_ids.len() as f64;
                group.position = (group.position * n + position) / (n + 1.);
                group.peak_ids.push(id);
            }
            _ => groups.push(AxisGroup { position, peak_ids: vec![id] }),
        }
    }
    groups
}

/// Group the nuclei of `peaks` along both axes. The join distance is
/// `group_distance_ratio` of the plotted range of each axis, which in pixel
/// space is the plot width or height. It does not depend on how spread out
/// this run's nuclei happen to be.
pub fn group_axes(peaks: &[Peak], options: &GatingOptions) -> AxisGroups {
    let ratio = options.group_distance_ratio();
    AxisGroups {
        x: group_axis(peaks.iter().map(|p| (p.id, p.nucleus.x)), ratio * options.plot_width as f64),
        y: group_axis(peaks.iter().map(|p| (p.id, p.nucleus.y)), ratio * options.plot_height as f64),
    }
}

impl AxisGroups {
    fn index_of(groups: &[AxisGroup], id: PeakId) -> Option<usize> {
        groups.iter().position(|g| g.peak_ids.contains(&id))
    }

    pub fn x_group(&self, id: PeakId) -> Option<usize> {
        Self::index_of(&self.x, id)
    }

    pub fn y_group(&self, id: PeakId) -> Option<usize> {
        Self::index_of(&self.y, id)
    }
}

/// Group `peaks` and write each one's `x_group`/`y_group`.
pub fn assign_groups(peaks: &mut [Peak], options: &GatingOptions) -> AxisGroups {
    let groups = group_axes(peaks, options);
    for peak in peaks.iter_mut() {
        peak.x_group = groups.x_group(peak.id);
        peak.y_group = groups.y_group(peak.id);
    }
    groups
}
