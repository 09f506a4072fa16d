use std::collections::BTreeSet;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::geometry::{convex_hull, Polygon, R2};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize, Tsify)]
pub struct PeakId(pub u32);

/// A growable region of the density grid.
///
/// `polygon_history` gets one entry per change to the region; the last entry
/// is the current boundary and always contains every included cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct Peak {
    pub id: PeakId,
    pub polygon_history: Vec<Polygon>,
    pub included_cells: BTreeSet<R2<usize>>,
    pub nucleus: R2<f64>,
    /// Consecutive iterations since this peak last took part in a merge.
    pub height: u32,
    pub true_peak: bool,
    pub true_peak_boundary_index: Option<usize>,
    pub protected: bool,
    pub x_group: Option<usize>,
    pub y_group: Option<usize>,
    /// Offset from `true_peak_boundary_index` of the boundary used as the gate.
    pub boundary_offset: i64,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub include_x_channel_zeroes: bool,
    /// Pixel range along Y of the X-zero events this peak includes.
    #[serde(default)]
    pub x_cutoffs: Option<[f64; 2]>,
    #[serde(default)]
    pub include_y_channel_zeroes: bool,
    /// Pixel range along X of the Y-zero events this peak includes.
    #[serde(default)]
    pub y_cutoffs: Option<[f64; 2]>,
    /// User override: never include X-zero events in this peak.
    #[serde(default)]
    pub disable_x_channel_zeroes: bool,
    #[serde(default)]
    pub disable_y_channel_zeroes: bool,
}

impl Peak {
    fn with_boundary(id: PeakId, boundary: Polygon, included_cells: BTreeSet<R2<usize>>, nucleus: R2<f64>) -> Self {
        Peak {
            id,
            polygon_history: vec![boundary],
            included_cells,
            nucleus,
            height: 0,
            true_peak: false,
            true_peak_boundary_index: None,
            protected: false,
            x_group: None,
            y_group: None,
            boundary_offset: 0,
            template_id: None,
            include_x_channel_zeroes: false,
            x_cutoffs: None,
            include_y_channel_zeroes: false,
            y_cutoffs: None,
            disable_x_channel_zeroes: false,
            disable_y_channel_zeroes: false,
        }
    }

    /// A peak consisting of one grid cell; its boundary is the cell's square.
    pub fn from_cell(id: PeakId, cell: R2<usize>) -> Self {
        let square = Polygon::new(cell.corners().to_vec());
        Peak::with_boundary(id, square, BTreeSet::from([cell]), cell.center())
    }

    /// A protected peak seeded from a known nucleus: a circle of `radius`
    /// plus whatever `cells` already lie inside it.
    pub fn seeded(id: PeakId, nucleus: R2<f64>, radius: f64, cells: BTreeSet<R2<usize>>) -> Self {
        let circle = Polygon::circle(nucleus, radius, SEED_VERTICES);
        let mut points = circle.vertices.clone();
        points.extend(cells.iter().flat_map(|c| c.corners()));
        let boundary = convex_hull(&points).unwrap_or(circle);
        let mut peak = Peak::with_boundary(id, boundary, cells, nucleus);
        peak.protected = true;
        peak
    }

    pub fn latest(&self) -> &Polygon {
        &self.polygon_history[self.polygon_history.len() - 1]
    }

    pub fn area(&self) -> f64 {
        self.latest().area()
    }

    /// Attach `cells` and append the recomputed hull.
    pub fn grow(&mut self, cells: &[R2<usize>]) {
        let mut points = self.latest().vertices.clone();
        for cell in cells {
            if self.included_cells.insert(*cell) {
                points.extend(cell.corners());
            }
        }
        self.push_hull(&points);
    }

    /// Take over `other`'s cells; this peak keeps its identity, height and
    /// true-peak state.
    pub fn absorb(&mut self, other: Peak) {
        let mut points = self.latest().vertices.clone();
        points.extend(other.latest().vertices.iter().copied());
        self.included_cells.extend(other.included_cells);
        self.push_hull(&points);
    }

    fn push_hull(&mut self, points: &[R2<f64>]) {
        if let Some(hull) = convex_hull(points) {
            if &hull != self.latest() {
                self.polygon_history.push(hull);
            }
        }
    }

    /// Mark as significant; never undone.
    pub fn promote(&mut self) {
        if !self.true_peak {
            self.true_peak = true;
            self.true_peak_boundary_index = Some(self.polygon_history.len() - 1);
        }
    }

    fn base_index(&self) -> usize {
        self.true_peak_boundary_index
            .unwrap_or(self.polygon_history.len() - 1)
    }

    /// Valid range of `boundary_offset`.
    pub fn offset_bounds(&self) -> (i64, i64) {
        let base = self.base_index() as i64;
        let last = self.polygon_history.len() as i64 - 1;
        (-base, last - base)
    }

    pub fn set_boundary_offset(&mut self, offset: i64) {
        let (lo, hi) = self.offset_bounds();
        self.boundary_offset = offset.clamp(lo, hi);
    }

    pub fn rendered_index(&self) -> usize {
        let (lo, hi) = self.offset_bounds();
        (self.base_index() as i64 + self.boundary_offset.clamp(lo, hi)) as usize
    }

    /// The boundary used as this peak's gate.
    pub fn rendered_polygon(&self) -> &Polygon {
        &self.polygon_history[self.rendered_index()]
    }
}

/// Vertex count of the circle seeding a protected peak.
pub const SEED_VERTICES: usize = 16;

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn growing_appends_larger_hulls() {
        let mut peak = Peak::from_cell(PeakId(1), R2 { x: 5, y: 5 });
        assert_relative_eq!(peak.area(), 1.);
        peak.grow(&[R2 { x: 6, y: 5 }, R2 { x: 6, y: 6 }, R2 { x: 5, y: 6 }]);
        assert_eq!(peak.polygon_history.len(), 2);
        assert_relative_eq!(peak.area(), 4.);
        assert_eq!(peak.included_cells.len(), 4);
        // Interior cell: cells grow, hull unchanged, no new history entry
        peak.grow(&[R2 { x: 5, y: 5 }]);
        assert_eq!(peak.polygon_history.len(), 2);
    }

    #[test]
    fn absorb_keeps_identity_and_unions_cells() {
        let mut a = Peak::from_cell(PeakId(1), R2 { x: 0, y: 0 });
        a.height = 7;
        let b = Peak::from_cell(PeakId(2), R2 { x: 3, y: 0 });
        a.absorb(b);
        assert_eq!(a.id, PeakId(1));
        assert_eq!(a.height, 7);
        assert_eq!(a.included_cells.len(), 2);
        assert_relative_eq!(a.area(), 4.);
    }

    #[test]
    fn boundary_offset_is_clamped_to_history() {
        let mut peak = Peak::from_cell(PeakId(1), R2 { x: 5, y: 5 });
        peak.grow(&[R2 { x: 6, y: 5 }]);
        peak.promote();
        peak.grow(&[R2 { x: 7, y: 5 }]);
        peak.grow(&[R2 { x: 8, y: 5 }]);
        assert_eq!(peak.true_peak_boundary_index, Some(1));
        assert_eq!(peak.offset_bounds(), (-1, 2));
        peak.set_boundary_offset(10);
        assert_eq!(peak.boundary_offset, 2);
        assert_eq!(peak.rendered_index(), 3);
        peak.set_boundary_offset(-10);
        assert_eq!(peak.rendered_index(), 0);
    }

    #[test]
    fn promotion_is_sticky() {
        let mut peak = Peak::from_cell(PeakId(1), R2 { x: 5, y: 5 });
        peak.promote();
        peak.grow(&[R2 { x: 9, y: 9 }]);
        peak.promote();
        assert!(peak.true_peak);
        assert_eq!(peak.true_peak_boundary_index, Some(0));
    }

    #[test]
    fn seeded_peak_is_protected_and_covers_circle() {
        let cells = BTreeSet::from([R2 { x: 10, y: 10 }]);
        let peak = Peak::seeded(PeakId(3), R2::new(10., 10.), 3., cells);
        assert!(peak.protected);
        assert!(peak.area() > 25.);
        assert!(peak.latest().contains(&R2::new(10., 10.)));
    }
}
