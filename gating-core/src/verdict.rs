use serde::{Deserialize, Serialize};
use tsify::Tsify;

use crate::peak::Peak;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Tsify)]
pub enum Status {
    #[serde(rename = "STATUS_SUCCESS")]
    Success,
    #[serde(rename = "STATUS_FAIL")]
    Fail,
}

/// One diagnostic check behind a verdict, phrased for the person who will
/// have to fix the gating by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tsify)]
pub struct Criterion {
    pub status: Status,
    pub message: String,
    pub information: String,
}

impl Criterion {
    pub fn success(message: impl Into<String>) -> Self {
        Criterion {
            status: Status::Success,
            message: message.into(),
            information: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>, information: impl Into<String>) -> Self {
        Criterion {
            status: Status::Fail,
            message: message.into(),
            information: information.into(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Success
    }
}

/// Outcome of peak finding or template matching. A failure is an expected,
/// user-actionable result, not an error: it carries the unmatched peaks and
/// the criteria that failed.
#[derive(Debug, Clone, Serialize, Deserialize, Tsify)]
#[serde(tag = "status")]
pub enum PeakVerdict {
    #[serde(rename = "STATUS_SUCCESS")]
    Success { peaks: Vec<Peak> },
    #[serde(rename = "STATUS_FAIL")]
    Fail {
        peaks: Vec<Peak>,
        criteria: Vec<Criterion>,
    },
}

impl PeakVerdict {
    pub fn status(&self) -> Status {
        match self {
            PeakVerdict::Success { .. } => Status::Success,
            PeakVerdict::Fail { .. } => Status::Fail,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    pub fn peaks(&self) -> &[Peak] {
        match self {
            PeakVerdict::Success { peaks } | PeakVerdict::Fail { peaks, .. } => peaks,
        }
    }

    pub fn into_peaks(self) -> Vec<Peak> {
        match self {
            PeakVerdict::Success { peaks } | PeakVerdict::Fail { peaks, .. } => peaks,
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        match self {
            PeakVerdict::Success { .. } => &[],
            PeakVerdict::Fail { criteria, .. } => criteria,
        }
    }
}
