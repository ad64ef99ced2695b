//! Headless backend on naga's GLSL frontend and validator.
//!
//! Stands in for a driver where no GPU context exists: tooling, CI and tests.
//! Compile logs use the glslang format (`ERROR: 0:<line>: <message>`) so the
//! usual line remapping applies. Geometry and tessellation stages are
//! rejected since naga has no frontend for them.
//!
//! naga only takes Vulkan-style GLSL, so before parsing, declarations without
//! a `layout` get one on the same line:
//!
//! - `uniform` declarations and blocks get `set = 0` and the next binding;
//! - vertex inputs and fragment outputs get the next free location;
//! - vertex outputs and fragment inputs get a location fixed per varying name
//!   for the lifetime of the backend, so both sides of an interface agree.
//!
//! Combined `sampler2D` uniforms still fail at `texture()` calls, as naga
//! wants a separate texture and sampler.
//!
//! Linking checks that a program is either a lone compute stage or has both
//! vertex and fragment stages, and that every fragment input location is
//! written by the vertex stage. Uniform and attribute locations are synthetic:
//! indices in order of first declaration.
use std::collections::HashMap;

use tracing::{debug, warn};
use unified::StageKind;
use wgpu::naga::{
    self,
    front::glsl::{Frontend, Options},
    valid::{Capabilities, ValidationFlags, Validator},
    AddressSpace, Binding, Module, ScalarKind, ShaderStage, TypeInner, VectorSize,
};

use crate::api::{
    GraphicsApi, Location, RawProgram, RawStage, UniformInfo, UniformKind, UniformValue,
};

/// Oldest `#version` naga's GLSL frontend accepts.
const MIN_NAGA_VERSION: u32 = 440;

/// Qualifiers allowed in front of `in`/`out` on a global declaration.
const INTERPOLATION: [&str; 4] = ["flat", "smooth", "noperspective", "centroid"];

struct CompiledModule {
    kind: StageKind,
    module: Module,
}

#[derive(Default)]
struct ProgramState {
    attached: Vec<u32>,
    uniforms: Vec<UniformInfo>,
    attributes: Vec<(String, Location)>,
    linked: bool,
}

#[derive(Default)]
pub struct NagaApi {
    next_id: u32,
    stages: HashMap<u32, CompiledModule>,
    programs: HashMap<u32, ProgramState>,
    values: HashMap<(u32, i32), UniformValue>,
    current: Option<RawProgram>,
    /// Locations handed to unannotated varyings, by name.
    varyings: HashMap<String, u32>,
}

impl NagaApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Program made current by the last `use_program`.
    pub fn current_program(&self) -> Option<RawProgram> {
        self.current
    }

    /// Last value written to `location` of `program`.
    pub fn uniform_value(&self, program: RawProgram, location: Location) -> Option<UniformValue> {
        self.values.get(&(program.0, location.get())).copied()
    }

    fn allocate(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn varying_location(&mut self, name: &str) -> u32 {
        let next = self.varyings.len() as u32;
        *self.varyings.entry(name.to_string()).or_insert(next)
    }

    /// Adds a `layout(...)` to every global `uniform`, `in` and `out`
    /// declaration that has none. Only touches lines in place.
    fn assign_layouts(&mut self, kind: StageKind, source: &str) -> String {
        let lines: Vec<&str> = source.split('\n').collect();
        let mut taken_inputs: Vec<u32> = Vec::new();
        let mut taken_outputs: Vec<u32> = Vec::new();
        for line in &lines {
            match explicit_location(line) {
                Some((Storage::In, location)) => taken_inputs.push(location),
                Some((Storage::Out, location)) => taken_outputs.push(location),
                _ => {}
            }
        }

        let mut binding = 0;
        let mut rewritten = Vec::with_capacity(lines.len());
        for line in lines {
            let Some(declaration) = bare_declaration(line) else {
                rewritten.push(line.to_string());
                continue;
            };
            let layout = match (declaration.storage, kind) {
                (Storage::Uniform, _) => {
                    binding += 1;
                    format!("layout(set = 0, binding = {})", binding - 1)
                }
                (Storage::Out, StageKind::Vertex) | (Storage::In, StageKind::Fragment) => {
                    format!("layout(location = {})", self.varying_location(&declaration.name))
                }
                (Storage::In, _) => format!("layout(location = {})", next_free(&mut taken_inputs)),
                (Storage::Out, _) => {
                    format!("layout(location = {})", next_free(&mut taken_outputs))
                }
            };
            let indent = line.len() - line.trim_start().len();
            rewritten.push(format!("{}{layout} {}", &line[..indent], &line[indent..]));
        }
        rewritten.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Uniform,
    In,
    Out,
}

#[derive(Debug, PartialEq, Eq)]
struct Declaration {
    storage: Storage,
    /// Declared variable name; empty for uniform blocks.
    name: String,
}

fn storage_qualifier(token: &str) -> Option<Storage> {
    match token {
        "uniform" => Some(Storage::Uniform),
        "in" => Some(Storage::In),
        "out" => Some(Storage::Out),
        _ => None,
    }
}

/// A global `uniform`/`in`/`out` declaration on one line without a layout.
fn bare_declaration(line: &str) -> Option<Declaration> {
    let trimmed = line.trim();
    if trimmed.starts_with("layout") || trimmed.contains('(') || trimmed.contains(')') {
        return None;
    }
    let mut tokens = trimmed
        .split_whitespace()
        .skip_while(|token| INTERPOLATION.contains(token));
    let storage = storage_qualifier(tokens.next()?)?;
    let rest: Vec<&str> = tokens.collect();

    if let Some(body) = trimmed.strip_suffix(';') {
        if rest.len() < 2 || body.contains('{') {
            return None;
        }
        let name = body
            .split_whitespace()
            .last()?
            .split('[')
            .next()
            .unwrap_or_default()
            .to_string();
        return Some(Declaration { storage, name });
    }

    // Block head: `uniform Params {` or `uniform Params` with the brace below.
    let block_head = match rest.as_slice() {
        [name] => !name.contains(';'),
        [_, "{"] => true,
        _ => false,
    };
    (storage == Storage::Uniform && block_head).then(|| Declaration {
        storage,
        name: String::new(),
    })
}

/// `location = N` of a `layout(...) in|out` declaration.
fn explicit_location(line: &str) -> Option<(Storage, u32)> {
    let rest = line.trim().strip_prefix("layout")?.trim_start().strip_prefix('(')?;
    let (arguments, tail) = rest.split_once(')')?;
    let storage = tail
        .split_whitespace()
        .filter(|token| !INTERPOLATION.contains(token))
        .find_map(storage_qualifier)?;
    let location = arguments.split(',').find_map(|argument| {
        let (key, value) = argument.split_once('=')?;
        (key.trim() == "location").then(|| value.trim().parse::<u32>().ok())?
    })?;
    Some((storage, location))
}

/// Smallest location not in `taken`, which it is then added to.
fn next_free(taken: &mut Vec<u32>) -> u32 {
    let location = (0..).find(|candidate| !taken.contains(candidate)).unwrap_or_default();
    taken.push(location);
    location
}

fn shader_stage(kind: StageKind) -> Option<ShaderStage> {
    match kind {
        StageKind::Vertex => Some(ShaderStage::Vertex),
        StageKind::Fragment => Some(ShaderStage::Fragment),
        StageKind::Compute => Some(ShaderStage::Compute),
        StageKind::Geometry | StageKind::TessControl | StageKind::TessEval => None,
    }
}

/// Raises a `#version` below what naga accepts to `450`, on the same line.
fn lift_version(source: &str) -> String {
    let mut lifted = String::with_capacity(source.len());
    let mut done = false;
    for (index, line) in source.split('\n').enumerate() {
        if index > 0 {
            lifted.push('\n');
        }
        let version = line
            .trim_start()
            .strip_prefix("#version")
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|number| number.parse::<u32>().ok());
        match version {
            Some(number) if !done && number < MIN_NAGA_VERSION => {
                lifted.push_str("#version 450 core");
                done = true;
            }
            Some(_) => {
                lifted.push_str(line);
                done = true;
            }
            None => lifted.push_str(line),
        }
    }
    lifted
}

fn uniform_kind(module: &Module, inner: &TypeInner) -> (UniformKind, u32) {
    match inner {
        TypeInner::Scalar(scalar) => {
            let kind = match scalar.kind {
                ScalarKind::Sint => UniformKind::Int,
                ScalarKind::Uint => UniformKind::Uint,
                ScalarKind::Float => UniformKind::Float,
                _ => UniformKind::Other,
            };
            (kind, 1)
        }
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => {
            let kind = match size {
                VectorSize::Bi => UniformKind::Vec2,
                VectorSize::Tri => UniformKind::Vec3,
                VectorSize::Quad => UniformKind::Vec4,
            };
            (kind, 1)
        }
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            ..
        } => (UniformKind::Mat4, 1),
        TypeInner::Image {
            dim: naga::ImageDimension::D2,
            arrayed: false,
            ..
        } => (UniformKind::Sampler2D, 1),
        TypeInner::Array { base, size, .. } => {
            let (kind, _) = uniform_kind(module, &module.types[*base].inner);
            let count = match size {
                naga::ArraySize::Constant(count) => count.get(),
                _ => 1,
            };
            (kind, count)
        }
        _ => (UniformKind::Other, 1),
    }
}

/// `(location, name)` pairs carried by an entry point argument or result.
fn locations(
    module: &Module,
    name: Option<&str>,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
) -> Vec<(u32, String)> {
    match binding {
        Some(Binding::Location { location, .. }) => {
            vec![(*location, name.unwrap_or_default().to_string())]
        }
        Some(_) => Vec::new(),
        None => match &module.types[ty].inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .flat_map(|member| {
                    locations(module, member.name.as_deref(), member.ty, member.binding.as_ref())
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn entry_inputs(module: &Module) -> Vec<(u32, String)> {
    module
        .entry_points
        .iter()
        .flat_map(|entry| entry.function.arguments.iter())
        .flat_map(|argument| {
            locations(module, argument.name.as_deref(), argument.ty, argument.binding.as_ref())
        })
        .collect()
}

fn entry_outputs(module: &Module) -> Vec<(u32, String)> {
    module
        .entry_points
        .iter()
        .filter_map(|entry| entry.function.result.as_ref())
        .flat_map(|result| locations(module, None, result.ty, result.binding.as_ref()))
        .collect()
}

fn check_interface(vertex: &Module, fragment: &Module) -> Result<(), String> {
    let written: Vec<u32> = entry_outputs(vertex)
        .into_iter()
        .map(|(location, _)| location)
        .collect();
    let unmatched: Vec<String> = entry_inputs(fragment)
        .into_iter()
        .filter(|(location, _)| !written.contains(location))
        .map(|(location, name)| {
            format!(
                "error: fragment shader input `{name}' at location {location} \
                 is not written by the vertex shader"
            )
        })
        .collect();
    if unmatched.is_empty() {
        Ok(())
    } else {
        Err(unmatched.join("\n"))
    }
}

impl GraphicsApi for NagaApi {
    fn backend_name(&self) -> &'static str {
        "naga"
    }

    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<RawStage, String> {
        let Some(stage) = shader_stage(kind) else {
            return Err(format!("ERROR: {kind} stages are not supported by the naga backend"));
        };

        let source = self.assign_layouts(kind, &lift_version(source));
        let module = Frontend::default()
            .parse(&Options::from(stage), &source)
            .map_err(|errors| {
                errors
                    .errors
                    .iter()
                    .map(|error| {
                        let location = error.meta.location(&source);
                        format!("ERROR: 0:{}: {}", location.line_number, error.kind)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;

        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|error| match error.location(&source) {
                Some(location) => {
                    format!("ERROR: 0:{}: {}", location.line_number, error.as_inner())
                }
                None => format!("ERROR: {}", error.as_inner()),
            })?;

        let id = self.allocate();
        debug!(stage = %kind, id, "naga module validated");
        self.stages.insert(id, CompiledModule { kind, module });
        Ok(RawStage(id))
    }

    fn delete_stage(&mut self, stage: RawStage) {
        self.stages.remove(&stage.0);
    }

    fn create_program(&mut self) -> Result<RawProgram, String> {
        let id = self.allocate();
        self.programs.insert(id, ProgramState::default());
        Ok(RawProgram(id))
    }

    fn attach_stage(&mut self, program: RawProgram, stage: RawStage) {
        if let Some(state) = self.programs.get_mut(&program.0) {
            state.attached.push(stage.0);
        }
    }

    fn detach_stage(&mut self, program: RawProgram, stage: RawStage) {
        if let Some(state) = self.programs.get_mut(&program.0) {
            state.attached.retain(|attached| *attached != stage.0);
        }
    }

    fn link_program(&mut self, program: RawProgram) -> Result<(), String> {
        let attached = self
            .programs
            .get(&program.0)
            .map(|state| state.attached.clone())
            .ok_or_else(|| format!("error: program {} does not exist", program.0))?;
        let modules: Vec<&CompiledModule> = attached
            .iter()
            .filter_map(|id| self.stages.get(id))
            .collect();
        let find = |kind: StageKind| {
            modules
                .iter()
                .find(|compiled| compiled.kind == kind)
                .map(|compiled| &compiled.module)
        };

        let compute = find(StageKind::Compute);
        match (find(StageKind::Vertex), find(StageKind::Fragment), compute) {
            (None, None, Some(_)) if modules.len() == 1 => {}
            (Some(vertex), Some(fragment), None) => check_interface(vertex, fragment)?,
            (_, _, Some(_)) => {
                return Err("error: compute shaders cannot be linked with other stages".into())
            }
            _ => return Err("error: program needs both a vertex and a fragment shader".into()),
        }

        let mut uniforms: Vec<UniformInfo> = Vec::new();
        for compiled in &modules {
            let module = &compiled.module;
            for (_, variable) in module.global_variables.iter() {
                if !matches!(variable.space, AddressSpace::Uniform | AddressSpace::Handle) {
                    continue;
                }
                let Some(name) = variable.name.clone() else {
                    continue;
                };
                if uniforms.iter().any(|known| known.name == name) {
                    continue;
                }
                let inner = &module.types[variable.ty].inner;
                if matches!(inner, TypeInner::Sampler { .. }) {
                    continue;
                }
                let (kind, size) = uniform_kind(module, inner);
                uniforms.push(UniformInfo {
                    name,
                    location: Location::new(uniforms.len() as i32),
                    kind,
                    size,
                });
            }
        }

        let attributes = find(StageKind::Vertex)
            .map(entry_inputs)
            .unwrap_or_default()
            .into_iter()
            .filter(|(_, name)| !name.is_empty())
            .filter_map(|(location, name)| Some((name, Location::new(location as i32)?)))
            .collect();

        if let Some(state) = self.programs.get_mut(&program.0) {
            state.uniforms = uniforms;
            state.attributes = attributes;
            state.linked = true;
        }
        Ok(())
    }

    fn validate_program(&mut self, program: RawProgram) -> Result<(), String> {
        match self.programs.get(&program.0) {
            Some(state) if state.linked => Ok(()),
            Some(_) => Err("program has not been linked".into()),
            None => Err(format!("program {} does not exist", program.0)),
        }
    }

    fn delete_program(&mut self, program: RawProgram) {
        self.programs.remove(&program.0);
        self.values.retain(|(owner, _), _| *owner != program.0);
        if self.current == Some(program) {
            self.current = None;
        }
    }

    fn uniform_location(&mut self, program: RawProgram, name: &str) -> Option<Location> {
        self.programs
            .get(&program.0)?
            .uniforms
            .iter()
            .find(|uniform| uniform.name == name)
            .and_then(|uniform| uniform.location)
    }

    fn attribute_location(&mut self, program: RawProgram, name: &str) -> Option<Location> {
        self.programs
            .get(&program.0)?
            .attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, location)| *location)
    }

    fn active_uniforms(&mut self, program: RawProgram) -> Vec<UniformInfo> {
        self.programs
            .get(&program.0)
            .map(|state| state.uniforms.clone())
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<RawProgram>) {
        self.current = program;
    }

    fn set_uniform(&mut self, program: RawProgram, location: Location, value: &UniformValue) {
        let kind = self.programs.get(&program.0).and_then(|state| {
            state
                .uniforms
                .iter()
                .find(|uniform| uniform.location == Some(location))
                .map(|uniform| uniform.kind)
        });
        match kind {
            Some(kind) if kind.accepts(value) || kind == UniformKind::Other => {
                self.values.insert((program.0, location.get()), *value);
            }
            Some(kind) => {
                warn!(program = program.0, location = %location, %kind, ?value, "uniform type mismatch");
            }
            None => {
                warn!(program = program.0, location = %location, "write to unknown uniform location");
            }
        }
    }
}
