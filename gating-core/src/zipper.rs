//! Making sibling gates tile the plot: overlapping zero-channel ranges are
//! split, overlapping polygons are cut along the bisector of their nuclei,
//! and polygons that include zero events are stretched to meet their axis.

use log::{debug, warn};
use ordered_float::OrderedFloat;

use crate::{
    geometry::{Polygon, R2},
    peak::Peak,
    zero::ZeroAxis,
};

fn cutoffs_mut(peak: &mut Peak, axis: ZeroAxis) -> &mut Option<[f64; 2]> {
    match axis {
        ZeroAxis::X => &mut peak.x_cutoffs,
        ZeroAxis::Y => &mut peak.y_cutoffs,
    }
}

fn cutoffs(peak: &Peak, axis: ZeroAxis) -> Option<[f64; 2]> {
    match axis {
        ZeroAxis::X if peak.include_x_channel_zeroes => peak.x_cutoffs,
        ZeroAxis::Y if peak.include_y_channel_zeroes => peak.y_cutoffs,
        _ => None,
    }
}

/// Where two peaks' zero-channel ranges on the same axis overlap, move both
/// ends to the middle of the overlap.
pub fn split_overlapping_cutoffs(peaks: &mut [Peak]) {
    for axis in [ZeroAxis::X, ZeroAxis::Y] {
        let mut order: Vec<(usize, [f64; 2])> = peaks
            .iter()
            .enumerate()
            .filter_map(|(idx, peak)| cutoffs(peak, axis).map(|c| (idx, c)))
            .collect();
        order.sort_by_key(|(idx, [lo, _])| (OrderedFloat(*lo), *idx));
        for pair in 0..order.len().saturating_sub(1) {
            let (a, [a_lo, a_hi]) = order[pair];
            let (b, [b_lo, b_hi]) = order[pair + 1];
            if a_hi <= b_lo {
                continue;
            }
            let mid = (b_lo + a_hi.min(b_hi)) / 2.;
            debug!("zipper {:?}: splitting [{a_lo}, {a_hi}] / [{b_lo}, {b_hi}] at {mid}", axis);
            order[pair].1 = [a_lo, mid];
            order[pair + 1].1 = [mid, b_hi.max(mid)];
            *cutoffs_mut(&mut peaks[a], axis) = Some(order[pair].1);
            *cutoffs_mut(&mut peaks[b], axis) = Some(order[pair + 1].1);
        }
    }
}

/// Cut every overlapping pair of `polygons` along the perpendicular bisector
/// of their `nuclei`, each keeping the side holding its own nucleus.
/// Clipping only removes area, so pairs fixed earlier stay disjoint.
pub fn separate_overlaps(polygons: &mut [Polygon], nuclei: &[R2<f64>]) {
    let n = polygons.len();
    for i in 0..n {
        for j in i + 1..n {
            if !polygons[i].intersects(&polygons[j]) {
                continue;
            }
            let d = nuclei[j] - nuclei[i];
            if d.norm() < 1e-9 {
                warn!("zipper: polygons {i} and {j} overlap but share a nucleus; leaving them");
                continue;
            }
            let mid = (nuclei[i] + nuclei[j]) / 2.;
            let dir = R2::new(-d.y, d.x);
            let back = R2::new(d.y, -d.x);
            match (polygons[i].clip_half_plane(&mid, &dir), polygons[j].clip_half_plane(&mid, &back)) {
                (Some(a), Some(b)) => {
                    debug!("zipper: clipped overlapping polygons {i} and {j}");
                    polygons[i] = a;
                    polygons[j] = b;
                }
                _ => warn!("zipper: clipping polygons {i} and {j} left a degenerate piece; leaving them"),
            }
        }
    }
}

fn nearest_vertex(polygon: &Polygon, target: &R2<f64>, candidates: impl Iterator<Item = usize>) -> Option<usize> {
    candidates.min_by_key(|&i| (OrderedFloat(polygon.vertices[i].distance(target)), i))
}

/// Index of the vertex of `polygon` nearest `target` that can be joined to
/// it without crossing a sibling, or the nearest vertex when none can.
fn connection_vertex(polygon: &Polygon, target: &R2<f64>, siblings: &[&Polygon]) -> usize {
    let n = polygon.num_vertices();
    let clear = (0..n).filter(|&i| !siblings.iter().any(|s| s.blocks_segment(target, &polygon.vertices[i])));
    nearest_vertex(polygon, target, clear).unwrap_or_else(|| {
        debug!("zipper: no clear connection to {target}; using the nearest vertex");
        nearest_vertex(polygon, target, 0..n).unwrap_or(0)
    })
}

/// Vertices from `from` to `to` inclusive, walking forward around the ring.
fn arc(vertices: &[R2<f64>], from: usize, to: usize) -> Vec<R2<f64>> {
    let n = vertices.len();
    let len = (to + n - from) % n;
    (0..=len).map(|k| vertices[(from + k) % n]).collect()
}

fn axis_coordinate(p: &R2<f64>, axis: ZeroAxis) -> f64 {
    match axis {
        ZeroAxis::X => p.x,
        ZeroAxis::Y => p.y,
    }
}

/// Replace the arc of `polygon` facing `axis` with a flat edge along it
/// covering `cutoffs`.
pub fn splice_axis_edge(polygon: &Polygon, axis: ZeroAxis, cutoffs: [f64; 2], siblings: &[&Polygon]) -> Polygon {
    let (lo, hi) = match axis {
        ZeroAxis::X => (R2::new(0., cutoffs[0]), R2::new(0., cutoffs[1])),
        ZeroAxis::Y => (R2::new(cutoffs[0], 0.), R2::new(cutoffs[1], 0.)),
    };
    let polygon = polygon.normalized();
    let vertices = &polygon.vertices;
    let i_lo = connection_vertex(&polygon, &lo, siblings);
    let i_hi = connection_vertex(&polygon, &hi, siblings);

    let ring = if i_lo == i_hi {
        // Both endpoints hang off one vertex; take whichever order keeps the
        // ring simple.
        let through = |first: R2<f64>, second: R2<f64>| {
            let mut ring = vertices.clone();
            ring.insert(i_lo + 1, second);
            ring.insert(i_lo + 1, first);
            ring
        };
        let ring = through(lo, hi);
        if Polygon::try_from_ring(ring.clone()).is_some_and(|p| !p.is_self_intersecting()) {
            ring
        } else {
            through(hi, lo)
        }
    } else {
        // Two ways to close the ring through the new edge; drop the arc
        // lying closer to the axis.
        let lo_to_hi = arc(vertices, i_lo, i_hi);
        let hi_to_lo = arc(vertices, i_hi, i_lo);
        let mean_coordinate = |arc: &[R2<f64>]| {
            arc.iter().map(|p| axis_coordinate(p, axis)).sum::<f64>() / arc.len() as f64
        };
        if mean_coordinate(&lo_to_hi) <= mean_coordinate(&hi_to_lo) {
            let mut ring = hi_to_lo;
            ring.extend([lo, hi]);
            ring
        } else {
            let mut ring = lo_to_hi;
            ring.extend([hi, lo]);
            ring
        }
    };
    // Concavities stay; the ring must not reach back over a sibling
    Polygon::try_from_ring(ring)
        .map(|p| p.normalized())
        .unwrap_or(polygon)
}

/// Run the zipper over sibling peaks' rendered polygons.
pub fn zip(peaks: &mut [Peak]) -> Vec<Polygon> {
    split_overlapping_cutoffs(peaks);
    let mut polygons: Vec<Polygon> = peaks.iter().map(|p| p.rendered_polygon().normalized()).collect();
    let nuclei: Vec<R2<f64>> = peaks.iter().map(|p| p.nucleus).collect();
    separate_overlaps(&mut polygons, &nuclei);

    for idx in 0..peaks.len() {
        for axis in [ZeroAxis::X, ZeroAxis::Y] {
            let Some(range) = cutoffs(&peaks[idx], axis) else { continue };
            let siblings: Vec<&Polygon> = polygons
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != idx)
                .map(|(_, p)| p)
                .collect();
            let spliced = splice_axis_edge(&polygons[idx], axis, range, &siblings);
            polygons[idx] = spliced;
        }
    }
    polygons
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;
    use crate::peak::PeakId;

    fn square(x0: f64, y0: f64, size: f64) -> Polygon {
        Polygon::new(vec![
            R2::new(x0, y0),
            R2::new(x0 + size, y0),
            R2::new(x0 + size, y0 + size),
            R2::new(x0, y0 + size),
        ])
    }

    fn peak_with(id: u32, x_cutoffs: Option<[f64; 2]>) -> Peak {
        let mut peak = Peak::from_cell(PeakId(id), R2 { x: 10, y: 10 });
        peak.include_x_channel_zeroes = x_cutoffs.is_some();
        peak.x_cutoffs = x_cutoffs;
        peak
    }

    #[test]
    fn overlapping_cutoffs_meet_in_the_middle() {
        let mut peaks = vec![
            peak_with(1, Some([30., 60.])),
            peak_with(2, Some([10., 40.])),
            peak_with(3, None),
        ];
        split_overlapping_cutoffs(&mut peaks);
        assert_eq!(peaks[1].x_cutoffs, Some([10., 35.]));
        assert_eq!(peaks[0].x_cutoffs, Some([35., 60.]));
        assert_eq!(peaks[2].x_cutoffs, None);
    }

    #[test]
    fn disjoint_cutoffs_are_untouched() {
        let mut peaks = vec![peak_with(1, Some([0., 10.])), peak_with(2, Some([20., 30.]))];
        split_overlapping_cutoffs(&mut peaks);
        assert_eq!(peaks[0].x_cutoffs, Some([0., 10.]));
        assert_eq!(peaks[1].x_cutoffs, Some([20., 30.]));
    }

    #[test]
    fn overlapping_polygons_become_disjoint() {
        let mut polygons = vec![square(0., 0., 10.), square(6., 0., 10.)];
        let nuclei = [R2::new(5., 5.), R2::new(11., 5.)];
        separate_overlaps(&mut polygons, &nuclei);
        assert_relative_eq!(polygons[0].bounds().max.x, 8., epsilon = 1e-9);
        assert_relative_eq!(polygons[1].bounds().min.x, 8., epsilon = 1e-9);
        assert_relative_eq!(polygons[0].area() + polygons[1].area(), 160., epsilon = 1e-9);
        assert!(polygons[0].contains(&nuclei[0]));
        assert!(polygons[1].contains(&nuclei[1]));
    }

    #[test]
    fn splice_reaches_the_axis() {
        let polygon = square(10., 20., 10.);
        let spliced = splice_axis_edge(&polygon, ZeroAxis::X, [20., 30.], &[]);
        assert!(spliced.signed_area() > 0.);
        assert!(!spliced.is_self_intersecting());
        assert!(spliced.vertices.contains(&R2::new(0., 20.)));
        assert!(spliced.vertices.contains(&R2::new(0., 30.)));
        // Original square plus the strip out to the axis
        assert_relative_eq!(spliced.area(), 200., epsilon = 1e-9);
        assert!(spliced.contains(&R2::new(5., 25.)));
        assert!(spliced.contains(&R2::new(15., 25.)));
    }

    #[test]
    fn splice_falls_back_to_nearest_vertex_when_blocked() {
        let polygon = square(10., 20., 10.);
        // Every segment from (0, 16) to the square crosses this sibling
        let sibling = square(2., 14., 6.);
        let spliced = splice_axis_edge(&polygon, ZeroAxis::X, [16., 30.], &[&sibling]);
        assert_eq!(spliced.num_vertices(), 6);
        assert!(spliced.vertices.contains(&R2::new(0., 16.)));
        assert!(spliced.vertices.contains(&R2::new(10., 20.)));
        assert!(spliced.signed_area() > 0.);
        assert!(!spliced.is_self_intersecting());
    }

    #[test]
    fn splice_keeps_concavity_around_sibling() {
        let polygon = square(10., 20., 10.);
        let sibling = square(9., 33., 3.);
        let spliced = splice_axis_edge(&polygon, ZeroAxis::X, [40., 50.], &[&sibling]);
        assert_eq!(spliced.num_vertices(), 6);
        assert!(!spliced.is_self_intersecting());
        assert!(spliced.vertices.contains(&R2::new(0., 40.)));
        assert!(spliced.vertices.contains(&R2::new(0., 50.)));
        // Its convex hull would be 300 and cover the sibling
        assert_relative_eq!(spliced.area(), 200., epsilon = 1e-9);
        assert!(!spliced.contains(&R2::new(10.5, 34.5)));
        assert!(spliced.contains(&R2::new(5., 35.)));
    }

    #[test]
    fn zip_splices_peaks_including_zeroes() {
        let mut peak = Peak::from_cell(PeakId(1), R2 { x: 20, y: 20 });
        peak.grow(&[R2 { x: 29, y: 29 }]);
        peak.include_y_channel_zeroes = true;
        peak.y_cutoffs = Some([18., 32.]);
        let mut peaks = vec![peak];
        let polygons = zip(&mut peaks);
        assert_eq!(polygons.len(), 1);
        assert_relative_eq!(polygons[0].bounds().min.y, 0., epsilon = 1e-9);
    }
}
