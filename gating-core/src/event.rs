use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{geometry::R2, scale::AxisScale};

pub type EventId = u64;

/// One cytometry event projected onto the two gating parameters, in raw
/// instrument units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
pub struct Event {
    pub id: EventId,
    pub x: f64,
    pub y: f64,
}

impl Event {
    pub fn new(id: EventId, x: f64, y: f64) -> Self {
        Event { id, x, y }
    }

    pub fn is_x_zero(&self) -> bool {
        self.x == 0.
    }

    pub fn is_y_zero(&self) -> bool {
        self.y == 0.
    }
}

/// The pair of axis scales and plot size that place events onto pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct PlotScales {
    pub x: AxisScale,
    pub y: AxisScale,
    pub width: usize,
    pub height: usize,
}

impl PlotScales {
    pub fn cell(&self, event: &Event) -> R2<usize> {
        R2 {
            x: self.x.to_pixel(event.x, self.width),
            y: self.y.to_pixel(event.y, self.height),
        }
    }

    /// Map a pixel-space point back to raw instrument units.
    pub fn to_raw(&self, p: &R2<f64>) -> R2<f64> {
        R2 {
            x: self.x.from_pixel(p.x, self.width),
            y: self.y.from_pixel(p.y, self.height),
        }
    }
}
