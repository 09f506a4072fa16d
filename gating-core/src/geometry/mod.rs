pub mod hull;
pub mod polygon;
pub mod r2;

pub use hull::convex_hull;
pub use polygon::{Bounds, Polygon};
pub use r2::R2;
