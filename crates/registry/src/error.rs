use compiler::{BuildError, GpuError};
use thiserror::Error;
use unified::{LoadError, SplitError};

/// Everything that can go wrong between a shader name and a usable program.
///
/// Cloneable so a failed entry can hand the same error to every caller.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Split(#[from] SplitError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("shader handle is not registered")]
    UnknownHandle,

    #[error("shader '{name}' is not loaded")]
    NotLoaded { name: String },
}

impl From<GpuError> for CompileError {
    fn from(err: GpuError) -> Self {
        Self::Build(BuildError::Gpu(err))
    }
}

impl CompileError {
    /// True for errors raised before any graphics call was made.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Load(_) | Self::Split(_))
    }

    /// True when the graphics thread, not the shader, caused the failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Build(BuildError::Gpu(_)))
    }
}
