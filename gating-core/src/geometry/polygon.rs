use std::fmt::Display;

use derive_more::From;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use super::{hull::convex_hull, r2::R2};

#[derive(Debug, Clone, From, PartialEq, Serialize, Deserialize, Tsify)]
pub struct Polygon {
    pub vertices: Vec<R2<f64>>,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
pub struct Bounds {
    pub min: R2<f64>,
    pub max: R2<f64>,
}

impl Polygon {
    pub fn new(vertices: Vec<R2<f64>>) -> Self {
        assert!(vertices.len() >= 3, "Polygon must have at least 3 vertices");
        Polygon { vertices }
    }

    /// Regular `n`-gon approximating a circle.
    pub fn circle(center: R2<f64>, radius: f64, n: usize) -> Self {
        let vertices = (0..n)
            .map(|i| {
                let theta = 2. * std::f64::consts::PI * (i as f64) / (n as f64);
                R2 {
                    x: center.x + radius * theta.cos(),
                    y: center.y + radius * theta.sin(),
                }
            })
            .collect();
        Polygon::new(vertices)
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Iterate over edges as `(v_i, v_{i+1})` pairs, wrapping around.
    pub fn edges(&self) -> impl Iterator<Item = (&R2<f64>, &R2<f64>)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (&self.vertices[i], &self.vertices[(i + 1) % n]))
    }

    /// Signed shoelace sum; positive for counter-clockwise winding.
    pub fn signed_area(&self) -> f64 {
        self.edges().map(|(a, b)| a.x * b.y - b.x * a.y).sum::<f64>() * 0.5
    }

    /// Area calculation using the shoelace formula
    pub fn area(&self) -> f64 {
        // Shoelace formula returns negative area for clockwise winding;
        // always return positive area regardless of winding order.
        self.signed_area().abs()
    }

    /// Area-weighted centroid; falls back to the vertex mean for degenerate
    /// (zero-area) rings.
    pub fn centroid(&self) -> R2<f64> {
        let a = self.signed_area();
        if a.abs() < 1e-12 {
            return self.center();
        }
        let (mut cx, mut cy) = (0., 0.);
        for (v0, v1) in self.edges() {
            let f = v0.x * v1.y - v1.x * v0.y;
            cx += (v0.x + v1.x) * f;
            cy += (v0.y + v1.y) * f;
        }
        R2 {
            x: cx / (6. * a),
            y: cy / (6. * a),
        }
    }

    /// Mean of the vertices.
    pub fn center(&self) -> R2<f64> {
        let n = self.vertices.len() as f64;
        let sum = self
            .vertices
            .iter()
            .fold(R2::new(0., 0.), |acc, v| acc + *v);
        sum / n
    }

    pub fn bounds(&self) -> Bounds {
        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in &self.vertices[1..] {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
        }
        Bounds { min, max }
    }

    /// Check if a point is inside the polygon using ray casting algorithm.
    /// Casts a horizontal ray to the right and counts edge crossings.
    pub fn contains(&self, p: &R2<f64>) -> bool {
        let mut crossings = 0;

        for (v0, v1) in self.edges() {
            // Skip if edge is entirely above or below the ray
            let (y_min, y_max) = if v0.y < v1.y { (v0.y, v1.y) } else { (v1.y, v0.y) };
            if p.y < y_min || p.y >= y_max {
                continue;
            }

            // Find x-coordinate where edge crosses y=p.y
            let t = (p.y - v0.y) / (v1.y - v0.y);
            let x_crossing = v0.x + t * (v1.x - v0.x);

            // Count crossing if it's to the right of p
            if x_crossing > p.x {
                crossings += 1;
            }
        }

        // Point is inside if odd number of crossings
        crossings % 2 == 1
    }

    /// Distance from `p` to the polygon: 0 inside, else distance to the
    /// nearest edge.
    pub fn distance_to_point(&self, p: &R2<f64>) -> f64 {
        if self.contains(p) {
            return 0.;
        }
        self.boundary_distance(p)
    }

    /// Distance from `p` to the nearest edge, regardless of containment.
    pub fn boundary_distance(&self, p: &R2<f64>) -> f64 {
        self.edges()
            .map(|(a, b)| p.distance_to_segment(a, b))
            .fold(f64::INFINITY, f64::min)
    }

    /// True if the boundaries cross or either polygon contains the other.
    pub fn intersects(&self, o: &Polygon) -> bool {
        if !self.bounds().overlaps(&o.bounds(), 0.) {
            return false;
        }
        for (a0, a1) in self.edges() {
            for (b0, b1) in o.edges() {
                if segments_intersect(a0, a1, b0, b1) {
                    return true;
                }
            }
        }
        o.vertices.iter().any(|v| self.contains(v)) || self.vertices.iter().any(|v| o.contains(v))
    }

    /// Gap between two polygons: 0 when they intersect, else the smallest
    /// edge-to-edge distance.
    pub fn distance_to_polygon(&self, o: &Polygon) -> f64 {
        if self.intersects(o) {
            return 0.;
        }
        let mut min = f64::INFINITY;
        for v in &self.vertices {
            min = min.min(o.boundary_distance(v));
        }
        for v in &o.vertices {
            min = min.min(self.boundary_distance(v));
        }
        min
    }

    /// True if the segment `a`–`b` crosses this polygon's boundary or lies
    /// inside it.
    pub fn blocks_segment(&self, a: &R2<f64>, b: &R2<f64>) -> bool {
        if self.edges().any(|(v0, v1)| segments_intersect(a, b, v0, v1)) {
            return true;
        }
        let mid = (*a + *b) / 2.;
        self.contains(&mid)
    }

    /// Check if this polygon self-intersects (any non-adjacent edges cross).
    pub fn is_self_intersecting(&self) -> bool {
        let n = self.vertices.len();
        if n < 4 {
            return false; // Triangles can't self-intersect
        }

        for i in 0..n {
            let a0 = &self.vertices[i];
            let a1 = &self.vertices[(i + 1) % n];

            for j in (i + 2)..n {
                // Skip the edge adjacent to i across the wrap-around
                if i == 0 && j == n - 1 {
                    continue;
                }

                let b0 = &self.vertices[j];
                let b1 = &self.vertices[(j + 1) % n];

                if segments_intersect(a0, a1, b0, b1) {
                    return true;
                }
            }
        }
        false
    }

    /// Keep the part of the polygon on the side of the line through `p` with
    /// direction `dir` where `(x - p) × dir <= 0` (Sutherland–Hodgman, one
    /// clip edge). Returns `None` when less than a triangle remains.
    pub fn clip_half_plane(&self, p: &R2<f64>, dir: &R2<f64>) -> Option<Polygon> {
        let side = |v: &R2<f64>| (*v - *p).cross(dir);
        let mut out: Vec<R2<f64>> = Vec::with_capacity(self.vertices.len() + 2);
        for (v0, v1) in self.edges() {
            let s0 = side(v0);
            let s1 = side(v1);
            let in0 = s0 <= 0.;
            let in1 = s1 <= 0.;
            if in0 {
                out.push(*v0);
            }
            if in0 != in1 {
                let t = s0 / (s0 - s1);
                out.push(*v0 + (*v1 - *v0) * t);
            }
        }
        Polygon::try_from_ring(out)
    }

    /// Build a polygon from a ring, dropping repeated points; `None` when
    /// fewer than three distinct vertices remain or the ring has no area.
    pub fn try_from_ring(ring: Vec<R2<f64>>) -> Option<Polygon> {
        let ring = dedup_ring(ring);
        if ring.len() < 3 {
            return None;
        }
        let polygon = Polygon { vertices: ring };
        if polygon.area() < 1e-9 {
            return None;
        }
        Some(polygon)
    }

    /// Counter-clockwise, duplicate-free copy of this ring. Self-intersecting
    /// rings are replaced by their convex hull.
    pub fn normalized(&self) -> Polygon {
        let ring = dedup_ring(self.vertices.clone());
        if ring.len() < 3 {
            return self.clone();
        }
        let mut polygon = Polygon { vertices: ring };
        if polygon.is_self_intersecting() || polygon.area() < 1e-9 {
            return convex_hull(&polygon.vertices).unwrap_or(polygon);
        }
        if polygon.signed_area() < 0. {
            polygon.vertices.reverse();
        }
        polygon
    }
}

fn dedup_ring(mut ring: Vec<R2<f64>>) -> Vec<R2<f64>> {
    ring.dedup_by(|a, b| a.distance(b) < 1e-9);
    while ring.len() > 1 && ring[0].distance(&ring[ring.len() - 1]) < 1e-9 {
        ring.pop();
    }
    ring
}

impl Bounds {
    pub fn overlaps(&self, o: &Bounds, margin: f64) -> bool {
        self.min.x - margin <= o.max.x
            && o.min.x - margin <= self.max.x
            && self.min.y - margin <= o.max.y
            && o.min.y - margin <= self.max.y
    }
}

/// Check if two line segments intersect (excluding endpoints).
pub fn segments_intersect(a0: &R2<f64>, a1: &R2<f64>, b0: &R2<f64>, b1: &R2<f64>) -> bool {
    // Using cross product method
    let d1 = cross_sign(b0, b1, a0);
    let d2 = cross_sign(b0, b1, a1);
    let d3 = cross_sign(a0, a1, b0);
    let d4 = cross_sign(a0, a1, b1);

    // Segments intersect if endpoints are on opposite sides of each other's lines
    ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
}

/// Cross product sign: (b - a) × (c - a)
pub fn cross_sign(a: &R2<f64>, b: &R2<f64>, c: &R2<f64>) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

impl Display for Polygon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verts: Vec<String> = self
            .vertices
            .iter()
            .map(|v| format!("({:.3}, {:.3})", v.x, v.y))
            .collect();
        write!(f, "Polygon[{}]", verts.join(", "))
    }
}
