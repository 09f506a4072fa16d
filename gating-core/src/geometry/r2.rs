use std::{
    fmt::{self, Display, Formatter},
    ops::{Add, Div, Mul, Sub},
};

use serde::{Deserialize, Serialize};
use tsify::Tsify;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Tsify)]
pub struct R2<D> {
    pub x: D,
    pub y: D,
}

impl<D> R2<D> {
    pub fn new(x: D, y: D) -> Self {
        R2 { x, y }
    }
}

impl<D: Display> Display for R2<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", self.x, self.y)
    }
}

impl R2<f64> {
    pub fn norm2(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn norm(&self) -> f64 {
        self.norm2().sqrt()
    }

    pub fn distance(&self, o: &R2<f64>) -> f64 {
        (*self - *o).norm()
    }

    pub fn dot(&self, o: &R2<f64>) -> f64 {
        self.x * o.x + self.y * o.y
    }

    /// z-component of `self × o`.
    pub fn cross(&self, o: &R2<f64>) -> f64 {
        self.x * o.y - self.y * o.x
    }

    /// Distance from this point to the segment `a`–`b`.
    pub fn distance_to_segment(&self, a: &R2<f64>, b: &R2<f64>) -> f64 {
        let ab = *b - *a;
        let len2 = ab.norm2();
        if len2 == 0. {
            return self.distance(a);
        }
        let t = ((*self - *a).dot(&ab) / len2).clamp(0., 1.);
        let proj = *a + ab * t;
        self.distance(&proj)
    }
}

impl R2<usize> {
    /// Centre of a grid cell, in pixel coordinates.
    pub fn center(&self) -> R2<f64> {
        R2 { x: self.x as f64, y: self.y as f64 }
    }

    /// The four corners of a grid cell (cells are unit squares centred on
    /// integer coordinates).
    pub fn corners(&self) -> [R2<f64>; 4] {
        let c = self.center();
        [
            R2 { x: c.x - 0.5, y: c.y - 0.5 },
            R2 { x: c.x + 0.5, y: c.y - 0.5 },
            R2 { x: c.x + 0.5, y: c.y + 0.5 },
            R2 { x: c.x - 0.5, y: c.y + 0.5 },
        ]
    }
}

impl<D: Add<Output = D>> Add for R2<D> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        R2 {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl<D: Sub<Output = D>> Sub for R2<D> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        R2 {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl Mul<f64> for R2<f64> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        R2 {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

impl Div<f64> for R2<f64> {
    type Output = Self;
    fn div(self, rhs: f64) -> Self::Output {
        R2 {
            x: self.x / rhs,
            y: self.y / rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn distance_to_segment_projects_onto_interior() {
        let p = R2::new(1., 1.);
        let d = p.distance_to_segment(&R2::new(0., 0.), &R2::new(2., 0.));
        assert_relative_eq!(d, 1., epsilon = 1e-10);
    }

    #[test]
    fn distance_to_segment_clamps_to_endpoint() {
        let p = R2::new(5., 4.);
        let d = p.distance_to_segment(&R2::new(0., 0.), &R2::new(2., 0.));
        assert_relative_eq!(d, 5., epsilon = 1e-10);
    }

    #[test]
    fn cell_corners_surround_center() {
        let cell = R2 { x: 3usize, y: 7usize };
        let corners = cell.corners();
        assert_eq!(corners[0], R2::new(2.5, 6.5));
        assert_eq!(corners[2], R2::new(3.5, 7.5));
    }
}
