//! One full gating run: density, peaks, grouping, template matching,
//! reconciliation and gate application, strictly in sequence.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::{
    density::estimate_density,
    error::{GatingError, Result},
    event::{Event, PlotScales},
    gate::{apply_gates, combine_gates, Gate},
    geometry::R2,
    grouping::assign_groups,
    homology::find_peaks,
    options::GatingOptions,
    peak::Peak,
    reconcile::{reconcile_polygons, FinalPolygon},
    template::{match_template, GateTemplateGroup, TemplateKind},
    verdict::{Criterion, PeakVerdict, Status},
};

/// Everything needed to gate one sample on one parameter pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    pub sample_id: String,
    pub x_parameter: usize,
    pub y_parameter: usize,
    pub events: Vec<Event>,
    pub scales: PlotScales,
    #[serde(default)]
    pub options: GatingOptions,
    /// Nuclei of peaks expected from earlier gating, in pixel coordinates.
    #[serde(default)]
    pub known_nuclei: Vec<R2<f64>>,
    /// Existing template group to match against, if any.
    #[serde(default)]
    pub template_group: Option<GateTemplateGroup>,
}

impl PipelineJob {
    /// Identifies equivalent jobs: the same sample, parameters and template
    /// group produce the same result.
    pub fn key(&self) -> String {
        let group = self.template_group.as_ref().map(|g| g.id.as_str()).unwrap_or("-");
        format!("{}:{}:{}:{}", self.sample_id, self.x_parameter, self.y_parameter, group)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub sample_id: String,
    pub status: Status,
    pub criteria: Vec<Criterion>,
    pub peaks: Vec<Peak>,
    pub polygons: Vec<FinalPolygon>,
    pub gates: Vec<Gate>,
    /// The group that was matched (with updated thresholds) or the one newly
    /// created from this run. Absent on failure.
    pub template_group: Option<GateTemplateGroup>,
}

impl PipelineOutput {
    fn failed(job: &PipelineJob, peaks: Vec<Peak>, criteria: Vec<Criterion>) -> Self {
        PipelineOutput {
            sample_id: job.sample_id.clone(),
            status: Status::Fail,
            criteria,
            peaks,
            polygons: vec![],
            gates: vec![],
            template_group: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// Run `job` end to end. Input-shape problems are errors; ambiguous peak
/// structure comes back as a `Fail` output with its criteria.
pub fn run_pipeline(job: &PipelineJob) -> Result<PipelineOutput> {
    let key = job.key();
    let (scales, options) = match &job.template_group {
        Some(group) => {
            if group.x_parameter != job.x_parameter || group.y_parameter != job.y_parameter {
                return Err(GatingError::ParameterMismatch {
                    group_id: group.id.clone(),
                    expected_x: group.x_parameter,
                    expected_y: group.y_parameter,
                    x: job.x_parameter,
                    y: job.y_parameter,
                });
            }
            let options = GatingOptions {
                plot_width: group.width,
                plot_height: group.height,
                machine_type: group.machine_type,
                ..group.apply_thresholds(&job.options)
            };
            (group.plot_scales(), options)
        }
        None => {
            let options = GatingOptions {
                plot_width: job.scales.width,
                plot_height: job.scales.height,
                ..job.options.clone()
            };
            (job.scales, options)
        }
    };

    let grid = estimate_density(&job.events, &scales, &options)?;
    let mut peaks = match find_peaks(&grid, &options, &job.known_nuclei)? {
        PeakVerdict::Success { peaks } => peaks,
        PeakVerdict::Fail { peaks, criteria } => {
            info!("pipeline {key}: peak finding failed");
            return Ok(PipelineOutput::failed(job, peaks, criteria));
        }
    };
    assign_groups(&mut peaks, &options);

    let group = match &job.template_group {
        Some(group) => {
            let mut group = group.clone();
            group.record_run(&peaks, &options);
            group
        }
        None => GateTemplateGroup::from_peaks(
            format!("{}/{}-{}", job.sample_id, job.x_parameter, job.y_parameter),
            job.x_parameter,
            job.y_parameter,
            &scales,
            &peaks,
            &options,
        ),
    };
    let mut peaks = match match_template(peaks, &group) {
        PeakVerdict::Success { peaks } => peaks,
        PeakVerdict::Fail { peaks, criteria } => {
            if job.template_group.is_none() {
                warn!("pipeline {key}: run did not match its own template group");
            }
            info!("pipeline {key}: template matching failed");
            return Ok(PipelineOutput::failed(job, peaks, criteria));
        }
    };

    let polygons = reconcile_polygons(&mut peaks, grid.zero_channels.as_ref(), &options);
    let mut gates = apply_gates(&job.events, &polygons, &scales, &options);
    for gate in gates.iter_mut() {
        if gate.template_id.is_none() {
            gate.template_id = group.templates.iter().find(|t| t.kind == gate.kind).map(|t| t.id.clone());
        }
    }
    let mut combinations: Vec<Gate> = vec![];
    for template in &group.templates {
        let TemplateKind::Combination { member_ids } = &template.kind else { continue };
        if let Some(unknown) = member_ids.iter().find(|id| group.template(id).is_none()) {
            return Err(GatingError::UnknownTemplate(unknown.clone()));
        }
        let members: Vec<&Gate> = gates
            .iter()
            .filter(|g| g.template_id.as_ref().is_some_and(|id| member_ids.contains(id)))
            .collect();
        combinations.push(combine_gates(template.id.clone(), &members));
    }
    gates.extend(combinations);

    info!(
        "pipeline {key}: {} peaks, {} gates over {} events",
        peaks.len(),
        gates.len(),
        job.events.len(),
    );
    Ok(PipelineOutput {
        sample_id: job.sample_id.clone(),
        status: Status::Success,
        criteria: vec![],
        peaks,
        polygons,
        gates,
        template_group: Some(group),
    })
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use test_log::test;

    use super::*;
    use crate::{options::MachineType, scale::AxisScale, template::GateTemplate};

    fn scales() -> PlotScales {
        PlotScales {
            x: AxisScale::Linear { min: 0., max: 1000. },
            y: AxisScale::Linear { min: 0., max: 1000. },
            width: 200,
            height: 150,
        }
    }

    /// Uniform discs of events around each centre, in raw units.
    fn clusters(centres: &[(f64, f64, usize)], seed: u64) -> Vec<Event> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut events = vec![];
        for &(cx, cy, n) in centres {
            for _ in 0..n {
                let r = 60. * rng.gen::<f64>().sqrt();
                let theta = rng.gen::<f64>() * std::f64::consts::TAU;
                events.push(Event::new(events.len() as u64, cx + r * theta.cos(), cy + r * theta.sin()));
            }
        }
        events
    }

    fn job(events: Vec<Event>) -> PipelineJob {
        PipelineJob {
            sample_id: "s1".to_string(),
            x_parameter: 3,
            y_parameter: 4,
            events,
            scales: scales(),
            options: GatingOptions::new(200, 150).with_min_peak_size(200.),
            known_nuclei: vec![],
            template_group: None,
        }
    }

    #[test]
    fn two_clusters_then_rematch() {
        let job = job(clusters(&[(250., 300.), (750., 700.)].map(|(x, y)| (x, y, 4000)), 1));
        let first = run_pipeline(&job).unwrap();
        assert!(first.is_success(), "{:?}", first.criteria);
        assert_eq!(first.peaks.len(), 2);
        // Two polygon gates plus the negative
        assert_eq!(first.gates.len(), 3);
        let total: usize = first.gates.iter().map(Gate::len).sum();
        assert_eq!(total, job.events.len());
        assert!(first.gates[0].len() > 3000);
        assert!(first.gates[1].len() > 3000);
        let group = first.template_group.clone().unwrap();
        assert_eq!(group.expected_peak_count, 2);

        let next = PipelineJob {
            sample_id: "s2".to_string(),
            events: clusters(&[(260., 290.), (740., 710.)].map(|(x, y)| (x, y, 3000)), 2),
            template_group: Some(group.clone()),
            ..job.clone()
        };
        let second = run_pipeline(&next).unwrap();
        assert!(second.is_success(), "{:?}", second.criteria);
        let mut ids: Vec<_> = second.gates.iter().map(|g| g.template_id.clone()).collect();
        let mut expected: Vec<_> = group.templates.iter().map(|t| Some(t.id.clone())).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn missing_population_fails_against_template() {
        let job = job(clusters(&[(250., 300.), (750., 700.)].map(|(x, y)| (x, y, 4000)), 3));
        let group = run_pipeline(&job).unwrap().template_group.unwrap();
        let sparse = PipelineJob {
            events: clusters(&[(250., 300., 4000)], 4),
            template_group: Some(group),
            ..job
        };
        let output = run_pipeline(&sparse).unwrap();
        assert_eq!(output.status, Status::Fail);
        assert_eq!(output.criteria.len(), 2);
        assert!(output.gates.is_empty());
        assert!(output.template_group.is_none());
    }

    #[test]
    fn mismatched_parameters_are_an_error() {
        let job = job(clusters(&[(250., 300., 4000)], 5));
        let group = run_pipeline(&job).unwrap().template_group.unwrap();
        let other = PipelineJob { x_parameter: 9, template_group: Some(group), ..job };
        assert!(matches!(run_pipeline(&other), Err(GatingError::ParameterMismatch { .. })));
    }

    #[test]
    fn empty_population_is_an_error() {
        assert_eq!(run_pipeline(&job(vec![])), Err(GatingError::EmptyPopulation));
    }

    #[test]
    fn mass_cytometry_adds_double_zero_gate() {
        let mut events = clusters(&[(250., 300., 4000)], 6);
        let n = events.len() as u64;
        events.extend((0..30).map(|i| Event::new(n + i, 0., 0.)));
        events.extend((0..200).map(|i| Event::new(n + 100 + i, 0., 300. + (i % 40) as f64)));
        let mut job = job(events);
        job.options = job.options.with_machine_type(MachineType::MassCytometry);
        let output = run_pipeline(&job).unwrap();
        assert!(output.is_success(), "{:?}", output.criteria);
        let double_zero = output.gates.iter().find(|g| g.kind == TemplateKind::DoubleZero).unwrap();
        assert_eq!(double_zero.len(), 30);
        assert!(output.polygons[0].include_x_channel_zeroes);
        let x_zero_gated = output.gates[0].event_ids.iter().filter(|&&id| id >= n + 100).count();
        assert!(x_zero_gated > 150, "{x_zero_gated}");
    }

    #[test]
    fn combination_templates_union_their_members() {
        let job = job(clusters(&[(250., 300.), (750., 700.)].map(|(x, y)| (x, y, 4000)), 7));
        let mut group = run_pipeline(&job).unwrap().template_group.unwrap();
        let polygon_ids: Vec<String> = group.polygon_templates().map(|t| t.id.clone()).collect();
        group.templates.push(GateTemplate::combination("both", polygon_ids));
        let output = run_pipeline(&PipelineJob { template_group: Some(group.clone()), ..job.clone() }).unwrap();
        let both = output.gates.iter().find(|g| g.template_id.as_deref() == Some("both")).unwrap();
        assert_eq!(both.len(), output.gates[0].len() + output.gates[1].len());

        group.templates.push(GateTemplate::combination("broken", vec!["nope".to_string()]));
        let result = run_pipeline(&PipelineJob { template_group: Some(group), ..job });
        assert_eq!(result, Err(GatingError::UnknownTemplate("nope".to_string())));
    }

    #[test]
    fn job_key_names_sample_parameters_and_group() {
        let job = job(vec![]);
        assert_eq!(job.key(), "s1:3:4:-");
    }
}
