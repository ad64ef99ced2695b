//! Turns split unified shaders into linked program objects.
//!
//! `compile_stage` and `link_program` (or `build_program` for both) take a
//! `&mut dyn GraphicsApi` and must run on the thread owning the graphics
//! context; `GpuThread` provides that thread.
mod api;
mod diagnostics;
mod error;
#[cfg(feature = "gl")]
mod gl;
mod link;
mod naga;
mod program;
mod stage;
mod worker;

use std::fmt;
use std::str::FromStr;

pub use api::{
    GraphicsApi, Location, RawProgram, RawStage, UniformInfo, UniformKind, UniformValue,
};
pub use diagnostics::{remap_log, render as render_diagnostics, Diagnostic};
pub use error::{BuildError, GpuError};
#[cfg(feature = "gl")]
pub use gl::GlApi;
pub use link::{build_program, link_program};
pub use naga::NagaApi;
pub use program::ShaderProgram;
pub use stage::{compile_stage, CompiledStage};
pub use worker::GpuThread;

/// Which `GraphicsApi` implementation to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// OpenGL through a context supplied by the caller.
    Gl,
    /// naga's GLSL frontend; no GPU needed.
    Naga,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "gl") {
            Self::Gl
        } else {
            Self::Naga
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gl => f.write_str("gl"),
            Self::Naga => f.write_str("naga"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "gl" | "opengl" => Ok(Self::Gl),
            "naga" | "headless" => Ok(Self::Naga),
            other => Err(format!("unknown backend '{other}' (expected gl or naga)")),
        }
    }
}

impl GpuThread {
    /// Graphics thread running the headless naga backend.
    pub fn headless(name: impl Into<String>) -> Result<Self, GpuError> {
        Self::spawn(name, || Ok(NagaApi::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_names() {
        assert_eq!("GL".parse::<Backend>(), Ok(Backend::Gl));
        assert_eq!("naga".parse::<Backend>(), Ok(Backend::Naga));
        assert!("vulkan".parse::<Backend>().is_err());
        assert_eq!(Backend::Naga.to_string(), "naga");
    }
}
