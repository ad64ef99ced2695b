use thiserror::Error;
use unified::StageKind;

use crate::diagnostics::{render, Diagnostic};

/// Failures of the owning graphics thread itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpuError {
    #[error("graphics thread is not running")]
    Unavailable,

    #[error("graphics thread job tried to wait on the graphics thread")]
    Reentrant,

    #[error("graphics thread failed to start: {0}")]
    Startup(String),
}

/// Why building a program from a split shader failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{stage} stage failed to compile:\n{}", render(.diagnostics))]
    StageCompile {
        stage: StageKind,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("program failed to link:\n{log}")]
    Link { log: String },

    #[error(transparent)]
    Gpu(#[from] GpuError),
}

impl BuildError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::StageCompile { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}
