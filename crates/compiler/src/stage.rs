use tracing::{debug, warn};
use unified::{StageBlock, StageKind};

use crate::api::{GraphicsApi, RawStage};
use crate::diagnostics::{remap_log, Diagnostic};
use crate::error::BuildError;

/// A successfully compiled stage object.
///
/// Only lives until the program it belongs to is linked; the linker releases
/// it whether or not the link succeeds. Dropping one without `release` leaks
/// the driver object and logs a warning.
#[derive(Debug)]
#[must_use = "compiled stages must be linked or released"]
pub struct CompiledStage {
    kind: StageKind,
    raw: RawStage,
    released: bool,
}

impl CompiledStage {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn raw(&self) -> RawStage {
        self.raw
    }

    pub fn release(mut self, api: &mut dyn GraphicsApi) {
        api.delete_stage(self.raw);
        self.released = true;
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for CompiledStage {
    fn drop(&mut self) {
        if !self.is_released() {
            warn!(stage = %self.kind, raw = self.raw.0, "stage dropped without release; leaked");
        }
    }
}

/// Compiles one block's derived source. A failure is final for this build;
/// nothing is retried.
pub fn compile_stage(
    api: &mut dyn GraphicsApi,
    block: &StageBlock,
) -> Result<CompiledStage, BuildError> {
    let kind = block.kind();
    debug!(
        stage = %kind,
        first_line = block.first_line(),
        backend = api.backend_name(),
        "compiling stage"
    );

    match api.compile_stage(kind, block.source()) {
        Ok(raw) => Ok(CompiledStage {
            kind,
            raw,
            released: false,
        }),
        Err(log) => {
            let mut diagnostics = remap_log(&log, block);
            if diagnostics.is_empty() {
                diagnostics.push(Diagnostic {
                    line: None,
                    message: "compiler reported a failure without a log".into(),
                });
            }
            Err(BuildError::StageCompile {
                stage: kind,
                diagnostics,
            })
        }
    }
}
