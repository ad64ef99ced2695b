use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};
use unified::StageKind;

use crate::api::{GraphicsApi, Location, RawProgram, UniformInfo, UniformValue};

/// A linked program object plus its location caches.
///
/// Once a name has been resolved it keeps that answer for the lifetime of the
/// program, including "not active". All methods that take a `GraphicsApi`
/// must run on the graphics thread. The program object is only deleted by
/// `destroy`; dropping the value without it leaks the object and logs a
/// warning.
#[derive(Debug)]
pub struct ShaderProgram {
    raw: RawProgram,
    stages: Vec<StageKind>,
    uniforms: Mutex<HashMap<String, Option<Location>>>,
    attributes: Mutex<HashMap<String, Option<Location>>>,
    destroyed: bool,
}

impl ShaderProgram {
    pub(crate) fn new(raw: RawProgram, stages: Vec<StageKind>) -> Self {
        Self {
            raw,
            stages,
            uniforms: Mutex::new(HashMap::new()),
            attributes: Mutex::new(HashMap::new()),
            destroyed: false,
        }
    }

    pub fn raw(&self) -> RawProgram {
        self.raw
    }

    /// Stage kinds the program was built from, in file order.
    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// Cached answer for `name`, without touching the graphics API.
    /// `None` means the name has not been looked up yet.
    pub fn cached_uniform(&self, name: &str) -> Option<Option<Location>> {
        self.uniforms.lock().get(name).copied()
    }

    pub fn cached_attribute(&self, name: &str) -> Option<Option<Location>> {
        self.attributes.lock().get(name).copied()
    }

    pub fn uniform_location(&self, api: &mut dyn GraphicsApi, name: &str) -> Option<Location> {
        *self
            .uniforms
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| api.uniform_location(self.raw, name))
    }

    pub fn attribute_location(&self, api: &mut dyn GraphicsApi, name: &str) -> Option<Location> {
        *self
            .attributes
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| api.attribute_location(self.raw, name))
    }

    pub fn active_uniforms(&self, api: &mut dyn GraphicsApi) -> Vec<UniformInfo> {
        api.active_uniforms(self.raw)
    }

    pub fn bind(&self, api: &mut dyn GraphicsApi) {
        api.use_program(Some(self.raw));
    }

    /// Writes `value` to the uniform called `name`. Returns `false` when the
    /// uniform is not active in this program.
    pub fn set_uniform(&self, api: &mut dyn GraphicsApi, name: &str, value: UniformValue) -> bool {
        match self.uniform_location(api, name) {
            Some(location) => {
                api.set_uniform(self.raw, location, &value);
                true
            }
            None => {
                debug!(uniform = name, "skipping write to inactive uniform");
                false
            }
        }
    }

    /// Releases the program object. Must run on the graphics thread.
    pub fn destroy(mut self, api: &mut dyn GraphicsApi) {
        debug!(program = self.raw.0, "deleting program");
        api.delete_program(self.raw);
        self.destroyed = true;
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for ShaderProgram {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            warn!(program = self.raw.0, "program dropped without being destroyed; leaked");
        }
    }
}
