//! Gate templates: durable, sample-independent descriptions of gates, and
//! matching a fresh peak set against a saved template group.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    event::PlotScales,
    options::{GatingOptions, MachineType},
    peak::Peak,
    scale::AxisScale,
    verdict::{Criterion, PeakVerdict},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TemplateKind {
    /// Matches one discovered peak by its axis groups.
    Polygon,
    /// Everything in the parent population outside the sibling polygon gates.
    Negative,
    /// Events zero on both axes (mass cytometry).
    DoubleZero,
    /// Union of other templates' gates.
    #[serde(rename_all = "camelCase")]
    Combination { member_ids: Vec<String> },
}

/// Parameters chosen when the template was created (or later by the user).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct CreatorParams {
    #[serde(default)]
    pub boundary_offset: i64,
    #[serde(default)]
    pub disable_x_channel_zeroes: bool,
    #[serde(default)]
    pub disable_y_channel_zeroes: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct GateTemplate {
    pub id: String,
    pub kind: TemplateKind,
    pub x_group: Option<usize>,
    pub y_group: Option<usize>,
    /// May be missing from a sample without failing the match.
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub params: CreatorParams,
}

impl GateTemplate {
    pub fn polygon(id: impl Into<String>, x_group: usize, y_group: usize) -> Self {
        GateTemplate {
            id: id.into(),
            kind: TemplateKind::Polygon,
            x_group: Some(x_group),
            y_group: Some(y_group),
            optional: false,
            params: CreatorParams::default(),
        }
    }

    fn special(id: impl Into<String>, kind: TemplateKind) -> Self {
        GateTemplate {
            id: id.into(),
            kind,
            x_group: None,
            y_group: None,
            optional: false,
            params: CreatorParams::default(),
        }
    }

    pub fn negative(id: impl Into<String>) -> Self {
        Self::special(id, TemplateKind::Negative)
    }

    pub fn double_zero(id: impl Into<String>) -> Self {
        Self::special(id, TemplateKind::DoubleZero)
    }

    pub fn combination(id: impl Into<String>, member_ids: Vec<String>) -> Self {
        Self::special(id, TemplateKind::Combination { member_ids })
    }

    pub fn is_polygon(&self) -> bool {
        self.kind == TemplateKind::Polygon
    }

    fn matches(&self, peak: &Peak) -> bool {
        self.is_polygon() && self.x_group == peak.x_group && self.y_group == peak.y_group
    }
}

/// The sibling templates produced by gating one (parent, X, Y) combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct GateTemplateGroup {
    pub id: String,
    pub x_parameter: usize,
    pub y_parameter: usize,
    pub x_scale: AxisScale,
    pub y_scale: AxisScale,
    pub width: usize,
    pub height: usize,
    #[serde(default)]
    pub machine_type: MachineType,
    pub expected_peak_count: usize,
    /// Ratchets down to the smallest threshold/true peak seen under this group.
    pub min_peak_size: f64,
    pub min_peak_height: f64,
    pub templates: Vec<GateTemplate>,
}

impl GateTemplateGroup {
    /// Build a group describing `peaks` (already assigned to axis groups).
    /// Each peak's template records its current boundary offset.
    pub fn from_peaks(
        id: impl Into<String>,
        x_parameter: usize,
        y_parameter: usize,
        scales: &PlotScales,
        peaks: &[Peak],
        options: &GatingOptions,
    ) -> Self {
        let id = id.into();
        let mut templates: Vec<GateTemplate> = Vec::with_capacity(peaks.len() + 2);
        for (idx, peak) in peaks.iter().enumerate() {
            let (x_group, y_group) = (peak.x_group.unwrap_or(0), peak.y_group.unwrap_or(0));
            let mut template = GateTemplate::polygon(format!("{id}/{idx}-{x_group}-{y_group}"), x_group, y_group);
            template.params = CreatorParams {
                boundary_offset: peak.boundary_offset,
                disable_x_channel_zeroes: peak.disable_x_channel_zeroes,
                disable_y_channel_zeroes: peak.disable_y_channel_zeroes,
            };
            templates.push(template);
        }
        templates.push(GateTemplate::negative(format!("{id}/negative")));
        if options.zero_channels_enabled() {
            templates.push(GateTemplate::double_zero(format!("{id}/double-zero")));
        }

        let mut group = GateTemplateGroup {
            id,
            x_parameter,
            y_parameter,
            x_scale: scales.x,
            y_scale: scales.y,
            width: scales.width,
            height: scales.height,
            machine_type: options.machine_type,
            expected_peak_count: peaks.len(),
            min_peak_size: options.min_peak_size(),
            min_peak_height: options.min_peak_height(),
            templates,
        };
        group.record_run(peaks, options);
        group
    }

    pub fn polygon_templates(&self) -> impl Iterator<Item = &GateTemplate> {
        self.templates.iter().filter(|t| t.is_polygon())
    }

    pub fn template(&self, id: &str) -> Option<&GateTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn plot_scales(&self) -> PlotScales {
        PlotScales {
            x: self.x_scale,
            y: self.y_scale,
            width: self.width,
            height: self.height,
        }
    }

    /// Lower the stored thresholds to those used for a run and to the
    /// smallest true peak it found, so weaker populations found once are
    /// never missed on later samples.
    pub fn record_run(&mut self, peaks: &[Peak], options: &GatingOptions) {
        let smallest = peaks
            .iter()
            .filter_map(|p| p.true_peak_boundary_index.map(|i| p.polygon_history[i].area()))
            .fold(f64::INFINITY, f64::min);
        self.min_peak_size = self.min_peak_size.min(options.min_peak_size()).min(smallest);
        self.min_peak_height = self.min_peak_height.min(options.min_peak_height());
        debug!(
            "template group {}: min peak size {:.1}, min peak height {:.1}",
            self.id, self.min_peak_size, self.min_peak_height,
        );
    }

    /// `options` with this group's (possibly lower) thresholds applied.
    pub fn apply_thresholds(&self, options: &GatingOptions) -> GatingOptions {
        options
            .clone()
            .with_min_peak_size(options.min_peak_size().min(self.min_peak_size))
            .with_min_peak_height(options.min_peak_height().min(self.min_peak_height))
    }
}

/// Match `peaks` (with axis groups assigned) against `group`.
///
/// Every non-optional polygon template must claim a distinct peak in its
/// axis-group cell, and no peak may be left unclaimed. On success each peak
/// takes its template's id and creator parameters.
pub fn match_template(mut peaks: Vec<Peak>, group: &GateTemplateGroup) -> PeakVerdict {
    let mut claimed: Vec<Option<usize>> = vec![None; peaks.len()];
    let mut missing: Vec<&GateTemplate> = Vec::new();

    // Required templates first so optional ones can't steal their peaks
    let (required, optional): (Vec<&GateTemplate>, Vec<&GateTemplate>) =
        group.polygon_templates().partition(|t| !t.optional);
    for (template_idx, template) in required.iter().chain(optional.iter()).enumerate() {
        let found = peaks
            .iter()
            .enumerate()
            .position(|(idx, peak)| claimed[idx].is_none() && template.matches(peak));
        match found {
            Some(idx) => claimed[idx] = Some(template_idx),
            None if !template.optional => missing.push(template),
            None => {}
        }
    }

    let order = if missing.is_empty() {
        Criterion::success("Populations line up with the saved gate layout")
    } else {
        let missing: Vec<String> = missing
            .iter()
            .map(|t| format!("{} at group ({}, {})", t.id, t.x_group.unwrap_or(0), t.y_group.unwrap_or(0)))
            .collect();
        Criterion::fail(
            "Populations did not line up with the saved gate layout",
            format!(
                "No population found for {}. Try increasing maxGroupDistance so nearby populations share an axis group",
                missing.join(", "),
            ),
        )
    };

    let matched_optional = claimed
        .iter()
        .flatten()
        .filter(|&&t| t >= required.len())
        .count();
    let allowed = required.len() + matched_optional;
    let count = if peaks.len() <= allowed {
        Criterion::success(format!("Found {} populations as expected", peaks.len()))
    } else {
        Criterion::fail(
            format!("Found {} populations, the template expects {}", peaks.len(), allowed),
            "Adjust the minimum peak size or minimum peak height so only the expected populations are significant",
        )
    };

    if !order.passed() || !count.passed() {
        info!("match_template {}: {} / {}", group.id, order.message, count.message);
        return PeakVerdict::Fail { peaks, criteria: vec![order, count] };
    }

    let templates: Vec<&GateTemplate> = required.into_iter().chain(optional).collect();
    for (peak, template_idx) in peaks.iter_mut().zip(claimed) {
        if let Some(template) = template_idx.map(|i| templates[i]) {
            peak.template_id = Some(template.id.clone());
            peak.set_boundary_offset(template.params.boundary_offset);
            peak.disable_x_channel_zeroes = template.params.disable_x_channel_zeroes;
            peak.disable_y_channel_zeroes = template.params.disable_y_channel_zeroes;
        }
    }
    info!("match_template {}: matched {} populations", group.id, peaks.len());
    PeakVerdict::Success { peaks }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::{
        density::DensityGrid,
        geometry::R2,
        grouping::assign_groups,
        homology::find_peaks,
        peak::PeakId,
        verdict::Status,
    };

    fn scales() -> PlotScales {
        PlotScales {
            x: AxisScale::Linear { min: 0., max: 199. },
            y: AxisScale::Linear { min: 0., max: 149. },
            width: 200,
            height: 150,
        }
    }

    fn peak(id: u32, x_group: usize, y_group: usize) -> Peak {
        let mut peak = Peak::from_cell(PeakId(id), R2 { x: 10 * id as usize, y: 10 });
        for i in 0..5 {
            peak.grow(&[R2 { x: 10 * id as usize + i, y: 11 + i }]);
        }
        peak.promote();
        peak.x_group = Some(x_group);
        peak.y_group = Some(y_group);
        peak
    }

    fn group_for(peaks: &[Peak]) -> GateTemplateGroup {
        GateTemplateGroup::from_peaks("g", 2, 3, &scales(), peaks, &GatingOptions::new(200, 150))
    }

    #[test]
    fn round_trip_on_own_output_succeeds() {
        let mut values = vec![0.; 200 * 150];
        for (cx, cy, top) in [(50., 75., 100.), (150., 75., 80.)] {
            for y in 0..150 {
                for x in 0..200 {
                    let d = R2::new(x as f64, y as f64).distance(&R2::new(cx, cy));
                    let v = (top * (1. - d / 25.)).max(0.);
                    values[y * 200 + x] = f64::max(values[y * 200 + x], v);
                }
            }
        }
        let grid = DensityGrid::from_values(200, 150, values).unwrap();
        let options = GatingOptions::new(200, 150).with_min_peak_size(200.).with_min_peak_height(4.);
        let mut peaks = find_peaks(&grid, &options, &[]).unwrap().into_peaks();
        assert_eq!(peaks.len(), 2);
        assign_groups(&mut peaks, &options);

        let group = GateTemplateGroup::from_peaks("g", 0, 1, &scales(), &peaks, &options);
        let verdict = match_template(peaks.clone(), &group);
        assert_eq!(verdict.status(), Status::Success);
        for (before, after) in peaks.iter().zip(verdict.peaks()) {
            assert_eq!(after.boundary_offset, before.boundary_offset);
            assert!(after.template_id.is_some());
        }
    }

    #[test]
    fn missing_population_fails_order_check() {
        let group = group_for(&[peak(1, 0, 0), peak(2, 1, 0)]);
        let verdict = match_template(vec![peak(1, 0, 0)], &group);
        assert_eq!(verdict.status(), Status::Fail);
        let criteria = verdict.criteria();
        assert_eq!(criteria.len(), 2);
        assert!(!criteria[0].passed());
        assert!(criteria[0].information.contains("maxGroupDistance"));
        assert!(criteria[1].passed());
        assert_eq!(verdict.peaks().len(), 1);
        assert!(verdict.peaks()[0].template_id.is_none());
    }

    #[test]
    fn extra_population_fails_count_check() {
        let group = group_for(&[peak(1, 0, 0)]);
        let verdict = match_template(vec![peak(1, 0, 0), peak(2, 1, 1)], &group);
        assert_eq!(verdict.status(), Status::Fail);
        let criteria = verdict.criteria();
        assert!(criteria[0].passed());
        assert!(!criteria[1].passed());
    }

    #[test]
    fn optional_template_may_be_missing() {
        let mut group = group_for(&[peak(1, 0, 0), peak(2, 1, 0)]);
        group.templates[1].optional = true;
        assert!(match_template(vec![peak(1, 0, 0)], &group).is_success());
        assert!(match_template(vec![peak(1, 0, 0), peak(2, 1, 0)], &group).is_success());
    }

    #[test]
    fn matched_peaks_inherit_clamped_offset() {
        let mut group = group_for(&[peak(1, 0, 0)]);
        group.templates[0].params.boundary_offset = 99;
        group.templates[0].params.disable_x_channel_zeroes = true;
        let verdict = match_template(vec![peak(1, 0, 0)], &group);
        let matched = &verdict.peaks()[0];
        assert_eq!(matched.boundary_offset, matched.offset_bounds().1);
        assert!(matched.disable_x_channel_zeroes);
        assert_eq!(matched.template_id.as_deref(), Some(group.templates[0].id.as_str()));
    }

    #[test]
    fn group_ratchets_min_peak_size_down() {
        let peaks = [peak(1, 0, 0)];
        let mut group = group_for(&peaks);
        assert_eq!(group.min_peak_size, peaks[0].polygon_history[peaks[0].true_peak_boundary_index.unwrap()].area());
        let before = group.min_peak_size;
        group.record_run(&peaks, &GatingOptions::new(200, 150).with_min_peak_size(1.));
        assert_eq!(group.min_peak_size, 1.);
        group.record_run(&peaks, &GatingOptions::new(200, 150));
        assert_eq!(group.min_peak_size, 1.);
        assert!(before > 1.);
    }

    #[test]
    fn group_serializes_template_kinds() {
        let mut group = group_for(&[peak(1, 0, 0)]);
        group.templates.push(GateTemplate::combination("g/combo", vec!["g/0-0-0".into(), "g/negative".into()]));
        let json = serde_json::to_string(&group).unwrap();
        assert!(json.contains(r#""type":"negative""#));
        assert!(json.contains(r#""memberIds""#));
        let back: GateTemplateGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back, group);
    }
}
