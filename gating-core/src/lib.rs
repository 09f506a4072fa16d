pub mod density;
pub mod error;
pub mod event;
pub mod gate;
pub mod geometry;
pub mod grouping;
pub mod homology;
pub mod options;
pub mod peak;
pub mod pipeline;
pub mod reconcile;
pub mod scale;
pub mod template;
pub mod verdict;
pub mod zero;
pub mod zipper;

// Re-export key types and the public operations
pub use density::{estimate_density, DensityGrid, MarginalDensity, ZeroChannelDensity};
pub use error::{GatingError, Result};
pub use event::{Event, EventId, PlotScales};
pub use gate::{apply_gates, combine_gates, Gate};
pub use geometry::{Polygon, R2};
pub use grouping::{assign_groups, group_axes, AxisGroup, AxisGroups};
pub use homology::find_peaks;
pub use options::{GatingOptions, MachineType};
pub use peak::{Peak, PeakId};
pub use pipeline::{run_pipeline, PipelineJob, PipelineOutput};
pub use reconcile::{reconcile_polygons, FinalPolygon};
pub use scale::AxisScale;
pub use template::{match_template, GateTemplate, GateTemplateGroup, TemplateKind};
pub use verdict::{Criterion, PeakVerdict, Status};

/// Parse a log level string into LevelFilter.
pub fn parse_log_level(level: Option<&str>) -> Result<log::LevelFilter> {
    match level {
        Some("off") => Ok(log::LevelFilter::Off),
        Some("error") => Ok(log::LevelFilter::Error),
        Some("warn") => Ok(log::LevelFilter::Warn),
        Some("info") | Some("") | None => Ok(log::LevelFilter::Info),
        Some("debug") => Ok(log::LevelFilter::Debug),
        Some("trace") => Ok(log::LevelFilter::Trace),
        Some(level) => Err(GatingError::InvalidLogLevel(level.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels() {
        assert_eq!(parse_log_level(None), Ok(log::LevelFilter::Info));
        assert_eq!(parse_log_level(Some("debug")), Ok(log::LevelFilter::Debug));
        assert_eq!(parse_log_level(Some("loud")), Err(GatingError::InvalidLogLevel("loud".to_string())));
    }
}
