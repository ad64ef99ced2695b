use std::collections::HashMap;
use std::sync::Arc;

use compiler::{GraphicsApi, Location, ShaderProgram, UniformValue};

use crate::ShaderHandle;

/// Access to the graphics thread from inside `ShaderRegistry::run`.
///
/// Holds the programs that were current when the job was queued, so a reload
/// finishing mid-frame is picked up by the next frame, never halfway through.
pub struct Frame<'a> {
    api: &'a mut dyn GraphicsApi,
    programs: &'a HashMap<ShaderHandle, Arc<ShaderProgram>>,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(
        api: &'a mut dyn GraphicsApi,
        programs: &'a HashMap<ShaderHandle, Arc<ShaderProgram>>,
    ) -> Self {
        Self { api, programs }
    }

    /// The raw backend, for draw calls and other state the registry does not
    /// manage.
    pub fn api(&mut self) -> &mut dyn GraphicsApi {
        &mut *self.api
    }

    /// Makes the handle's program current. Returns `false` for an unknown
    /// handle and leaves the current program alone.
    pub fn bind(&mut self, handle: ShaderHandle) -> bool {
        match self.programs.get(&handle) {
            Some(program) => {
                program.bind(&mut *self.api);
                true
            }
            None => false,
        }
    }

    pub fn unbind(&mut self) {
        self.api.use_program(None);
    }

    pub fn uniform_location(&mut self, handle: ShaderHandle, name: &str) -> Option<Location> {
        let program = self.programs.get(&handle)?;
        program.uniform_location(&mut *self.api, name)
    }

    pub fn attribute_location(&mut self, handle: ShaderHandle, name: &str) -> Option<Location> {
        let program = self.programs.get(&handle)?;
        program.attribute_location(&mut *self.api, name)
    }

    pub fn set_uniform(&mut self, handle: ShaderHandle, name: &str, value: UniformValue) -> bool {
        match self.programs.get(&handle) {
            Some(program) => program.set_uniform(&mut *self.api, name, value),
            None => false,
        }
    }
}
