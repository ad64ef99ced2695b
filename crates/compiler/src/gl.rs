//! OpenGL backend through the `gl` crate.
//!
//! The windowing collaborator owns context creation. Build `GlApi` inside the
//! `GpuThread` factory, after the context is current on that thread, and hand
//! it anything that must stay alive with the context via `keep_alive`.
use std::any::Any;
use std::ffi::{c_void, CString};
use std::ptr::null_mut;

use gl::types::{GLchar, GLenum, GLint, GLsizei, GLuint};
use tracing::warn;
use unified::StageKind;

use crate::api::{
    GraphicsApi, Location, RawProgram, RawStage, UniformInfo, UniformKind, UniformValue,
};

pub struct GlApi {
    current: Option<RawProgram>,
    _guard: Option<Box<dyn Any>>,
}

impl GlApi {
    /// Loads GL entry points with `loader`, typically the windowing
    /// library's `get_proc_address`.
    pub fn load_with<F>(mut loader: F) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        gl::load_with(|symbol| loader(symbol));
        Self {
            current: None,
            _guard: None,
        }
    }

    /// Keeps `guard` (usually the context itself) alive as long as the API.
    pub fn keep_alive(mut self, guard: impl Any) -> Self {
        self._guard = Some(Box::new(guard));
        self
    }
}

fn stage_type(kind: StageKind) -> GLenum {
    match kind {
        StageKind::Vertex => gl::VERTEX_SHADER,
        StageKind::TessControl => gl::TESS_CONTROL_SHADER,
        StageKind::TessEval => gl::TESS_EVALUATION_SHADER,
        StageKind::Geometry => gl::GEOMETRY_SHADER,
        StageKind::Fragment => gl::FRAGMENT_SHADER,
        StageKind::Compute => gl::COMPUTE_SHADER,
    }
}

fn uniform_kind(raw: GLenum) -> UniformKind {
    match raw {
        gl::INT => UniformKind::Int,
        gl::UNSIGNED_INT => UniformKind::Uint,
        gl::FLOAT => UniformKind::Float,
        gl::FLOAT_VEC2 => UniformKind::Vec2,
        gl::FLOAT_VEC3 => UniformKind::Vec3,
        gl::FLOAT_VEC4 => UniformKind::Vec4,
        gl::FLOAT_MAT4 => UniformKind::Mat4,
        gl::SAMPLER_2D => UniformKind::Sampler2D,
        _ => UniformKind::Other,
    }
}

fn c_name(name: &str) -> Option<CString> {
    CString::new(name).ok()
}

fn info_log(len: GLint, read: impl FnOnce(GLsizei, *mut GLchar)) -> String {
    let len = len.max(0) as usize;
    let mut log = vec![0u8; len + 1];
    read(log.len() as GLsizei, log.as_mut_ptr() as *mut GLchar);
    let end = log.iter().position(|byte| *byte == 0).unwrap_or(log.len());
    String::from_utf8_lossy(&log[..end]).into_owned()
}

fn shader_log(shader: GLuint) -> String {
    let mut len: GLint = 0;
    unsafe { gl::GetShaderiv(shader, gl::INFO_LOG_LENGTH, &mut len) };
    info_log(len, |size, buffer| unsafe {
        gl::GetShaderInfoLog(shader, size, null_mut(), buffer)
    })
}

fn program_log(program: GLuint) -> String {
    let mut len: GLint = 0;
    unsafe { gl::GetProgramiv(program, gl::INFO_LOG_LENGTH, &mut len) };
    info_log(len, |size, buffer| unsafe {
        gl::GetProgramInfoLog(program, size, null_mut(), buffer)
    })
}

impl GraphicsApi for GlApi {
    fn backend_name(&self) -> &'static str {
        "gl"
    }

    fn compile_stage(&mut self, kind: StageKind, source: &str) -> Result<RawStage, String> {
        let source = CString::new(source)
            .map_err(|err| format!("shader source contains a NUL byte at {}", err.nul_position()))?;

        unsafe {
            let shader = gl::CreateShader(stage_type(kind));
            if shader == 0 {
                return Err(format!("unable to create {kind} shader object"));
            }
            gl::ShaderSource(shader, 1, &source.as_ptr(), std::ptr::null());
            gl::CompileShader(shader);

            let mut status = gl::FALSE as GLint;
            gl::GetShaderiv(shader, gl::COMPILE_STATUS, &mut status);
            if status == gl::TRUE as GLint {
                Ok(RawStage(shader))
            } else {
                let log = shader_log(shader);
                gl::DeleteShader(shader);
                Err(log)
            }
        }
    }

    fn delete_stage(&mut self, stage: RawStage) {
        unsafe { gl::DeleteShader(stage.0) }
    }

    fn create_program(&mut self) -> Result<RawProgram, String> {
        match unsafe { gl::CreateProgram() } {
            0 => Err("unable to create program object".into()),
            program => Ok(RawProgram(program)),
        }
    }

    fn attach_stage(&mut self, program: RawProgram, stage: RawStage) {
        unsafe { gl::AttachShader(program.0, stage.0) }
    }

    fn detach_stage(&mut self, program: RawProgram, stage: RawStage) {
        unsafe { gl::DetachShader(program.0, stage.0) }
    }

    fn link_program(&mut self, program: RawProgram) -> Result<(), String> {
        unsafe {
            gl::LinkProgram(program.0);
            let mut status = gl::FALSE as GLint;
            gl::GetProgramiv(program.0, gl::LINK_STATUS, &mut status);
            if status == gl::TRUE as GLint {
                Ok(())
            } else {
                Err(program_log(program.0))
            }
        }
    }

    fn validate_program(&mut self, program: RawProgram) -> Result<(), String> {
        unsafe {
            gl::ValidateProgram(program.0);
            let mut status = gl::FALSE as GLint;
            gl::GetProgramiv(program.0, gl::VALIDATE_STATUS, &mut status);
            if status == gl::TRUE as GLint {
                Ok(())
            } else {
                Err(program_log(program.0))
            }
        }
    }

    fn delete_program(&mut self, program: RawProgram) {
        if self.current == Some(program) {
            self.use_program(None);
        }
        unsafe { gl::DeleteProgram(program.0) }
    }

    fn uniform_location(&mut self, program: RawProgram, name: &str) -> Option<Location> {
        let name = c_name(name)?;
        Location::new(unsafe { gl::GetUniformLocation(program.0, name.as_ptr()) })
    }

    fn attribute_location(&mut self, program: RawProgram, name: &str) -> Option<Location> {
        let name = c_name(name)?;
        Location::new(unsafe { gl::GetAttribLocation(program.0, name.as_ptr()) })
    }

    fn active_uniforms(&mut self, program: RawProgram) -> Vec<UniformInfo> {
        let mut count: GLint = 0;
        let mut max_len: GLint = 0;
        unsafe {
            gl::GetProgramiv(program.0, gl::ACTIVE_UNIFORMS, &mut count);
            gl::GetProgramiv(program.0, gl::ACTIVE_UNIFORM_MAX_LENGTH, &mut max_len);
        }

        let mut buffer = vec![0u8; max_len.max(1) as usize];
        let mut uniforms = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count.max(0) as GLuint {
            let mut length: GLsizei = 0;
            let mut size: GLint = 0;
            let mut ty: GLenum = 0;
            unsafe {
                gl::GetActiveUniform(
                    program.0,
                    index,
                    buffer.len() as GLsizei,
                    &mut length,
                    &mut size,
                    &mut ty,
                    buffer.as_mut_ptr() as *mut GLchar,
                );
            }

            let raw_name = String::from_utf8_lossy(&buffer[..length.max(0) as usize]);
            let name = raw_name.trim_end_matches("[0]").to_string();
            let location = self.uniform_location(program, &name);
            uniforms.push(UniformInfo {
                name,
                location,
                kind: uniform_kind(ty),
                size: size.max(1) as u32,
            });
        }
        uniforms
    }

    fn use_program(&mut self, program: Option<RawProgram>) {
        unsafe { gl::UseProgram(program.map_or(0, |program| program.0)) }
        self.current = program;
    }

    fn set_uniform(&mut self, program: RawProgram, location: Location, value: &UniformValue) {
        // GL 3.3 has no direct-state uniform writes; bind, write, restore.
        let previous = self.current;
        if previous != Some(program) {
            unsafe { gl::UseProgram(program.0) }
        }

        let at = location.get();
        unsafe {
            match value {
                UniformValue::Int(v) => gl::Uniform1i(at, *v),
                UniformValue::Uint(v) => gl::Uniform1ui(at, *v),
                UniformValue::Float(v) => gl::Uniform1f(at, *v),
                UniformValue::Vec2(v) => gl::Uniform2fv(at, 1, v.as_ptr()),
                UniformValue::Vec3(v) => gl::Uniform3fv(at, 1, v.as_ptr()),
                UniformValue::Vec4(v) => gl::Uniform4fv(at, 1, v.as_ptr()),
                UniformValue::Mat4(v) => gl::UniformMatrix4fv(at, 1, gl::FALSE, v.as_ptr()),
            }

            let error = gl::GetError();
            if error != gl::NO_ERROR {
                warn!(program = program.0, location = at, error, "uniform write rejected");
            }

            if previous != Some(program) {
                gl::UseProgram(previous.map_or(0, |program| program.0));
            }
        }
    }
}
