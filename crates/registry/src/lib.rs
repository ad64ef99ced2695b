//! Reference-counted cache of linked unified shader programs, keyed by
//! logical name, with reload-on-change.
//!
//! Types:
//!
//! - `ShaderRegistry` owns every program and the graphics thread they live
//!   on; callers only ever see `ShaderHandle`s.
//! - `RegistryOptions` carries the splitter and linker knobs, usually built
//!   from a `shaderconfig::RegistryConfig`.
//! - `Frame` gives jobs queued with `ShaderRegistry::run` access to the
//!   backend and to programs by handle.
//! - `CompileError` is the one error type callers handle.
mod error;
mod frame;
mod registry;

use std::sync::Arc;

use compiler::GpuThread;
use shaderconfig::RegistryConfig;
use unified::{FileLoader, SplitOptions};

pub use error::CompileError;
pub use frame::Frame;
pub use registry::{ShaderHandle, ShaderRegistry, ShaderStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    pub split: SplitOptions,
    /// Run the advisory validation step after every link.
    pub validate_after_link: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            split: SplitOptions::default(),
            validate_after_link: true,
        }
    }
}

impl From<&RegistryConfig> for RegistryOptions {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            split: SplitOptions {
                native_pragmas: config.native_pragmas,
            },
            validate_after_link: config.validate_after_link,
        }
    }
}

impl ShaderRegistry {
    /// Registry reading shader files from the configured roots.
    pub fn from_config(config: &RegistryConfig, gpu: GpuThread) -> Self {
        let loader = FileLoader::new(config.roots.clone());
        Self::new(Arc::new(loader), gpu, RegistryOptions::from(config))
    }
}
