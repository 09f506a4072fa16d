#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatingError {
    #[error("Population is empty: no events to gate")]
    EmptyPopulation,

    #[error("Invalid plot dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Density grid {width}x{height} is empty (max density {max_density})")]
    EmptyDensity {
        width: usize,
        height: usize,
        max_density: f64,
    },

    #[error("Density grid has {actual} values, expected {width}x{height}")]
    GridShape {
        width: usize,
        height: usize,
        actual: usize,
    },

    #[error("Unknown gate template {0:?}")]
    UnknownTemplate(String),

    #[error("Template group {group_id:?} was built for parameters ({expected_x}, {expected_y}), got ({x}, {y})")]
    ParameterMismatch {
        group_id: String,
        expected_x: usize,
        expected_y: usize,
        x: usize,
        y: usize,
    },

    #[error("Invalid log level {0:?}")]
    InvalidLogLevel(String),
}

pub type Result<T, E = GatingError> = std::result::Result<T, E>;
