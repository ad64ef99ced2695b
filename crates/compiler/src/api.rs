//! The graphics-API seam. Everything above this trait is backend agnostic;
//! everything below it talks to a driver (or to naga, for headless checks).
//!
//! Types:
//!
//! - `GraphicsApi` is implemented once per backend and only ever used from the
//!   thread that owns the context (see `GpuThread`).
//! - `RawStage`, `RawProgram` and `Location` are plain backend names with no
//!   ownership attached; `CompiledStage` and `ShaderProgram` own them.
//! - `UniformInfo`, `UniformKind` and `UniformValue` describe active uniforms
//!   and the values that can be written to them.
use std::fmt;

use unified::StageKind;

/// Backend name of a compiled stage object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawStage(pub u32);

/// Backend name of a program object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawProgram(pub u32);

/// A resolved, non-negative uniform or attribute location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location(i32);

impl Location {
    /// Wraps a location reported by the driver; negative means inactive.
    pub fn new(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    pub fn get(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Int,
    Uint,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Sampler2D,
    Other,
}

impl UniformKind {
    /// Kind of uniform a value of this shape can be written to.
    pub fn accepts(self, value: &UniformValue) -> bool {
        matches!(
            (self, value),
            (Self::Int | Self::Sampler2D, UniformValue::Int(_))
                | (Self::Uint, UniformValue::Uint(_))
                | (Self::Float, UniformValue::Float(_))
                | (Self::Vec2, UniformValue::Vec2(_))
                | (Self::Vec3, UniformValue::Vec3(_))
                | (Self::Vec4, UniformValue::Vec4(_))
                | (Self::Mat4, UniformValue::Mat4(_))
        )
    }
}

impl fmt::Display for UniformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Mat4 => "mat4",
            Self::Sampler2D => "sampler2D",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// One active uniform of a linked program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformInfo {
    pub name: String,
    pub location: Option<Location>,
    pub kind: UniformKind,
    /// Array length, 1 for non-arrays.
    pub size: u32,
}

/// A value for `GraphicsApi::set_uniform`. Matrices are column-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Uint(u32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
}

/// Operations the compiler needs from a graphics backend.
///
/// Implementations are not required to be `Send`; they are created on and
/// never leave the graphics thread.
pub trait GraphicsApi {
    /// Short backend name for logs, e.g. `"gl"`.
    fn backend_name(&self) -> &'static str;

    /// Compiles one derived stage source. On failure the stage object is
    /// already released and the driver's info log is returned.
    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<RawStage, String>;

    fn delete_stage(&mut self, stage: RawStage);

    fn create_program(&mut self) -> Result<RawProgram, String>;

    fn attach_stage(&mut self, program: RawProgram, stage: RawStage);

    fn detach_stage(&mut self, program: RawProgram, stage: RawStage);

    /// Links the attached stages; returns the link log on failure.
    fn link_program(&mut self, program: RawProgram) -> Result<(), String>;

    /// Checks the program against the current pipeline state.
    fn validate_program(&mut self, program: RawProgram) -> Result<(), String>;

    fn delete_program(&mut self, program: RawProgram);

    fn uniform_location(&mut self, program: RawProgram, name: &str) -> Option<Location>;

    fn attribute_location(&mut self, program: RawProgram, name: &str) -> Option<Location>;

    fn active_uniforms(&mut self, program: RawProgram) -> Vec<UniformInfo>;

    /// Makes `program` current for draw calls, or clears it with `None`.
    fn use_program(&mut self, program: Option<RawProgram>);

    /// Writes a uniform of `program` without disturbing the current program.
    fn set_uniform(&mut self, program: RawProgram, location: Location, value: &UniformValue);
}
