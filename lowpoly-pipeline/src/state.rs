//! Job state machine
//!
//! A job walks `Imported -> Prepared -> Simplified -> Repaired -> Conformed
//! -> Unwrapped -> Baked -> Exported -> Done` and stops at the first fatal
//! error in `Failed`.

use std::fmt;

/// Unit of work that moves a job to its next state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Import,
    Prepare,
    /// Voxel remesh followed by decimation
    Simplify,
    Repair,
    Conform,
    Unwrap,
    Bake,
    Export,
    /// Manifest write
    Finish,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Import,
        Stage::Prepare,
        Stage::Simplify,
        Stage::Repair,
        Stage::Conform,
        Stage::Unwrap,
        Stage::Bake,
        Stage::Export,
        Stage::Finish,
    ];

    /// State reached when this stage succeeds
    pub fn completes(self) -> PipelineState {
        match self {
            Stage::Import => PipelineState::Imported,
            Stage::Prepare => PipelineState::Prepared,
            Stage::Simplify => PipelineState::Simplified,
            Stage::Repair => PipelineState::Repaired,
            Stage::Conform => PipelineState::Conformed,
            Stage::Unwrap => PipelineState::Unwrapped,
            Stage::Bake => PipelineState::Baked,
            Stage::Export => PipelineState::Exported,
            Stage::Finish => PipelineState::Done,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Import => "import",
            Stage::Prepare => "prepare",
            Stage::Simplify => "simplify",
            Stage::Repair => "repair",
            Stage::Conform => "conform",
            Stage::Unwrap => "unwrap",
            Stage::Bake => "bake",
            Stage::Export => "export",
            Stage::Finish => "finish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a job currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Imported,
    Prepared,
    Simplified,
    Repaired,
    Conformed,
    Unwrapped,
    Baked,
    Exported,
    Done,
    Failed { stage: Stage, reason: String },
}

impl PipelineState {
    /// Stage that leaves this state, `None` once terminal
    pub fn next_stage(&self) -> Option<Stage> {
        match self {
            PipelineState::Imported => Some(Stage::Prepare),
            PipelineState::Prepared => Some(Stage::Simplify),
            PipelineState::Simplified => Some(Stage::Repair),
            PipelineState::Repaired => Some(Stage::Conform),
            PipelineState::Conformed => Some(Stage::Unwrap),
            PipelineState::Unwrapped => Some(Stage::Bake),
            PipelineState::Baked => Some(Stage::Export),
            PipelineState::Exported => Some(Stage::Finish),
            PipelineState::Done | PipelineState::Failed { .. } => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineState::Failed { .. })
    }

    /// Name written to logs and the manifest
    pub fn name(&self) -> &'static str {
        match self {
            PipelineState::Imported => "Imported",
            PipelineState::Prepared => "Prepared",
            PipelineState::Simplified => "Simplified",
            PipelineState::Repaired => "Repaired",
            PipelineState::Conformed => "Conformed",
            PipelineState::Unwrapped => "Unwrapped",
            PipelineState::Baked => "Baked",
            PipelineState::Exported => "Exported",
            PipelineState::Done => "Done",
            PipelineState::Failed { .. } => "Failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Failed { stage, reason } => write!(f, "Failed({}: {})", stage, reason),
            other => f.write_str(other.name()),
        }
    }
}
