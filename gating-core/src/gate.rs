//! Applying final polygons to a sample's events.

use std::collections::BTreeSet;

use log::info;
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    event::{Event, EventId, PlotScales},
    geometry::{Polygon, R2},
    options::GatingOptions,
    reconcile::FinalPolygon,
    template::TemplateKind,
};

/// One template applied to one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub template_id: Option<String>,
    pub kind: TemplateKind,
    /// Boundary in pixel coordinates; `None` for gates defined by exclusion.
    pub polygon: Option<Polygon>,
    /// The same boundary in raw instrument units.
    pub raw_polygon: Option<Polygon>,
    pub event_ids: Vec<EventId>,
}

impl Gate {
    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}

fn to_raw(polygon: &Polygon, scales: &PlotScales) -> Polygon {
    Polygon {
        vertices: polygon.vertices.iter().map(|v| scales.to_raw(v)).collect(),
    }
}

/// Index of the first polygon gating `event`, if any.
fn owner(event: &Event, cell: R2<usize>, polygons: &[FinalPolygon], zero_channels: bool) -> Option<usize> {
    if zero_channels {
        match (event.is_x_zero(), event.is_y_zero()) {
            (true, true) => return None,
            (true, false) => return polygons.iter().position(|p| p.includes_x_zero(cell.y as f64)),
            (false, true) => return polygons.iter().position(|p| p.includes_y_zero(cell.x as f64)),
            (false, false) => {}
        }
    }
    let center = cell.center();
    polygons.iter().position(|p| p.polygon.contains(&center))
}

/// Sort `events` into one gate per polygon, a `Negative` gate holding the
/// rest, and (with zero channels enabled) a `DoubleZero` gate for events zero
/// on both axes. Each event lands in exactly one of these.
pub fn apply_gates(
    events: &[Event],
    polygons: &[FinalPolygon],
    scales: &PlotScales,
    options: &GatingOptions,
) -> Vec<Gate> {
    let zero_channels = options.zero_channels_enabled();
    let mut members: Vec<Vec<EventId>> = vec![vec![]; polygons.len()];
    let mut negative = vec![];
    let mut double_zero = vec![];
    for event in events {
        if zero_channels && event.is_x_zero() && event.is_y_zero() {
            double_zero.push(event.id);
            continue;
        }
        match owner(event, scales.cell(event), polygons, zero_channels) {
            Some(idx) => members[idx].push(event.id),
            None => negative.push(event.id),
        }
    }

    let mut gates: Vec<Gate> = polygons
        .iter()
        .zip(members)
        .map(|(polygon, event_ids)| Gate {
            template_id: polygon.template_id.clone(),
            kind: TemplateKind::Polygon,
            polygon: Some(polygon.polygon.clone()),
            raw_polygon: Some(to_raw(&polygon.polygon, scales)),
            event_ids,
        })
        .collect();
    gates.push(Gate {
        template_id: None,
        kind: TemplateKind::Negative,
        polygon: None,
        raw_polygon: None,
        event_ids: negative,
    });
    if zero_channels && !double_zero.is_empty() {
        gates.push(Gate {
            template_id: None,
            kind: TemplateKind::DoubleZero,
            polygon: None,
            raw_polygon: None,
            event_ids: double_zero,
        });
    }
    info!(
        "apply_gates: {} events into {} gates ({})",
        events.len(),
        gates.len(),
        gates.iter().map(|g| g.len().to_string()).collect::<Vec<_>>().join(", "),
    );
    gates
}

/// A `Combination` gate holding every event of `members`.
pub fn combine_gates(template_id: impl Into<String>, members: &[&Gate]) -> Gate {
    let event_ids: BTreeSet<EventId> = members.iter().flat_map(|g| g.event_ids.iter().copied()).collect();
    let member_ids = members.iter().filter_map(|g| g.template_id.clone()).collect();
    Gate {
        template_id: Some(template_id.into()),
        kind: TemplateKind::Combination { member_ids },
        polygon: None,
        raw_polygon: None,
        event_ids: event_ids.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{options::MachineType, peak::PeakId, scale::AxisScale};

    fn scales() -> PlotScales {
        PlotScales {
            x: AxisScale::Linear { min: 0., max: 200. },
            y: AxisScale::Linear { min: 0., max: 150. },
            width: 200,
            height: 150,
        }
    }

    fn rect(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> FinalPolygon {
        FinalPolygon {
            peak_id: PeakId(0),
            template_id: Some(id.to_string()),
            polygon: Polygon::new(vec![R2::new(x0, y0), R2::new(x1, y0), R2::new(x1, y1), R2::new(x0, y1)]),
            include_x_channel_zeroes: false,
            x_cutoffs: None,
            include_y_channel_zeroes: false,
            y_cutoffs: None,
        }
    }

    fn events() -> Vec<Event> {
        vec![
            Event::new(1, 20., 20.),
            Event::new(2, 25., 30.),
            Event::new(3, 120., 100.),
            Event::new(4, 180., 10.),
            Event::new(5, 0., 25.),
            Event::new(6, 0., 0.),
        ]
    }

    #[test]
    fn gates_partition_events() {
        let polygons = vec![rect("a", 10., 10., 50., 50.), rect("b", 100., 80., 140., 120.)];
        let gates = apply_gates(&events(), &polygons, &scales(), &GatingOptions::new(200, 150));
        assert_eq!(gates.len(), 3);
        assert_eq!(gates[0].event_ids, vec![1, 2]);
        assert_eq!(gates[1].event_ids, vec![3]);
        assert_eq!(gates[2].kind, TemplateKind::Negative);
        assert_eq!(gates[2].event_ids, vec![4, 5, 6]);
        let total: usize = gates.iter().map(Gate::len).sum();
        assert_eq!(total, events().len());
    }

    #[test]
    fn overlapping_polygons_still_give_disjoint_gates() {
        let polygons = vec![rect("a", 10., 10., 50., 50.), rect("b", 15., 15., 60., 60.)];
        let gates = apply_gates(&events(), &polygons, &scales(), &GatingOptions::new(200, 150));
        assert_eq!(gates[0].event_ids, vec![1, 2]);
        assert!(gates[1].is_empty());
    }

    #[test]
    fn zero_events_follow_cutoffs() {
        let mut a = rect("a", 10., 10., 50., 50.);
        a.include_x_channel_zeroes = true;
        a.x_cutoffs = Some([20., 30.]);
        let options = GatingOptions::new(200, 150).with_machine_type(MachineType::MassCytometry);
        let gates = apply_gates(&events(), &[a], &scales(), &options);
        assert_eq!(gates.len(), 3);
        assert_eq!(gates[0].event_ids, vec![1, 2, 5]);
        assert_eq!(gates[1].event_ids, vec![3, 4]);
        assert_eq!(gates[2].kind, TemplateKind::DoubleZero);
        assert_eq!(gates[2].event_ids, vec![6]);
    }

    #[test]
    fn raw_polygon_is_in_instrument_units() {
        let scales = PlotScales { x: AxisScale::Linear { min: 0., max: 2000. }, ..scales() };
        let gates = apply_gates(&events(), &[rect("a", 10., 10., 50., 50.)], &scales, &GatingOptions::new(200, 150));
        let raw = gates[0].raw_polygon.as_ref().unwrap();
        assert!(raw.bounds().max.x > 400.);
    }

    #[test]
    fn combination_is_a_union() {
        let polygons = vec![rect("a", 10., 10., 50., 50.), rect("b", 100., 80., 140., 120.)];
        let gates = apply_gates(&events(), &polygons, &scales(), &GatingOptions::new(200, 150));
        let combined = combine_gates("a+b", &[&gates[0], &gates[1]]);
        assert_eq!(combined.event_ids, vec![1, 2, 3]);
        assert_eq!(
            combined.kind,
            TemplateKind::Combination { member_ids: vec!["a".to_string(), "b".to_string()] },
        );
    }
}
