//! Stage outcomes and recoverable degradations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a recoverable condition that made a stage fall back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradationKind {
    /// Target triangle count was not positive or the mesh had no faces
    SimplifyNoop,
    /// Voxel grid had to be coarsened to stay within the cell budget
    RemeshClamped,
    /// A boundary loop exceeded the hole filling limit and stays open
    HoleTooLarge,
    /// Requested island margin did not fit and was reduced
    MarginReduced,
    /// High mesh has no base color texture; flat gray was written
    NoBaseColorTexture,
    /// Some atlas texels found no surface within the search distance
    RayMiss,
    /// Accelerated device missing, software baking used
    DeviceUnavailable,
    /// External preview renderer failed
    PreviewFailed,
}

impl DegradationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationKind::SimplifyNoop => "simplify_noop",
            DegradationKind::RemeshClamped => "remesh_clamped",
            DegradationKind::HoleTooLarge => "hole_too_large",
            DegradationKind::MarginReduced => "margin_reduced",
            DegradationKind::NoBaseColorTexture => "no_basecolor_texture",
            DegradationKind::RayMiss => "ray_miss",
            DegradationKind::DeviceUnavailable => "device_unavailable",
            DegradationKind::PreviewFailed => "preview_failed",
        }
    }
}

/// A recoverable condition with a human readable reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub kind: DegradationKind,
    pub message: String,
}

impl Degradation {
    pub fn new(kind: DegradationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// Result of running one pipeline stage that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed,
    /// The stage was disabled by its options; nothing was touched
    Skipped(String),
    /// The stage ran but fell back somewhere
    Degraded(Vec<Degradation>),
}

impl StageOutcome {
    /// `Completed` when nothing degraded, `Degraded` otherwise
    pub fn from_degradations(degradations: Vec<Degradation>) -> Self {
        if degradations.is_empty() {
            StageOutcome::Completed
        } else {
            StageOutcome::Degraded(degradations)
        }
    }

    pub fn degradations(&self) -> &[Degradation] {
        match self {
            StageOutcome::Degraded(d) => d,
            _ => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, StageOutcome::Skipped(_))
    }

    /// Combine two outcomes of sub-steps of the same stage
    pub fn merge(self, other: StageOutcome) -> StageOutcome {
        match (self, other) {
            (StageOutcome::Degraded(mut a), StageOutcome::Degraded(b)) => {
                a.extend(b);
                StageOutcome::Degraded(a)
            }
            (StageOutcome::Degraded(a), _) | (_, StageOutcome::Degraded(a)) => {
                StageOutcome::Degraded(a)
            }
            (StageOutcome::Skipped(r), StageOutcome::Skipped(_)) => StageOutcome::Skipped(r),
            _ => StageOutcome::Completed,
        }
    }
}
