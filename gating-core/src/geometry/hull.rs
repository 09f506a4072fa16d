use itertools::Itertools;
use ordered_float::OrderedFloat;

use super::{
    polygon::{cross_sign, Polygon},
    r2::R2,
};

/// Convex hull of a point set (Andrew's monotone chain), counter-clockwise,
/// without collinear vertices. `None` if the points are all collinear.
pub fn convex_hull(points: &[R2<f64>]) -> Option<Polygon> {
    let sorted: Vec<R2<f64>> = points
        .iter()
        .copied()
        .sorted_by_key(|p| (OrderedFloat(p.x), OrderedFloat(p.y)))
        .dedup()
        .collect();
    if sorted.len() < 3 {
        return None;
    }

    let mut lower: Vec<R2<f64>> = Vec::with_capacity(sorted.len());
    for p in &sorted {
        while lower.len() >= 2 && cross_sign(&lower[lower.len() - 2], &lower[lower.len() - 1], p) <= 0. {
            lower.pop();
        }
        lower.push(*p);
    }

    let mut upper: Vec<R2<f64>> = Vec::with_capacity(sorted.len());
    for p in sorted.iter().rev() {
        while upper.len() >= 2 && cross_sign(&upper[upper.len() - 2], &upper[upper.len() - 1], p) <= 0. {
            upper.pop();
        }
        upper.push(*p);
    }

    // Last point of each chain is the first point of the other
    lower.pop();
    upper.pop();
    lower.extend(upper);

    if lower.len() < 3 {
        return None;
    }
    Some(Polygon::new(lower))
}
