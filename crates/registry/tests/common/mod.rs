#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use compiler::{
    GpuThread, GraphicsApi, Location, RawProgram, RawStage, UniformInfo, UniformKind, UniformValue,
};
use registry::{RegistryOptions, ShaderRegistry};
use unified::{SourceLoader, StageKind};

/// Marker that makes the recording backend reject a stage at that line.
pub const COMPILE_ERROR: &str = "COMPILE_ERROR";
/// Marker that makes the recording backend fail the link.
pub const LINK_ERROR: &str = "LINK_ERROR";
/// Marker that makes the recording backend panic while compiling.
pub const DRIVER_CRASH: &str = "DRIVER_CRASH";

#[derive(Debug, Default)]
pub struct Counters {
    pub compiles: AtomicUsize,
    pub stages_deleted: AtomicUsize,
    pub programs_created: AtomicUsize,
    pub programs_deleted: AtomicUsize,
    pub links: AtomicUsize,
    pub binds: AtomicUsize,
    pub uniform_writes: AtomicUsize,
    /// Raw name of the current program, 0 when none.
    pub bound: AtomicU32,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

struct Stage {
    uniforms: Vec<String>,
    fails_link: bool,
}

#[derive(Default)]
struct Program {
    attached: Vec<u32>,
    uniforms: Vec<String>,
}

/// Backend that records every call and derives behaviour from the source
/// text instead of compiling it.
pub struct RecordingApi {
    counters: Arc<Counters>,
    compile_delay: Duration,
    next: u32,
    stages: HashMap<u32, Stage>,
    programs: HashMap<u32, Program>,
}

impl RecordingApi {
    pub fn new(counters: Arc<Counters>, compile_delay: Duration) -> Self {
        Self {
            counters,
            compile_delay,
            next: 0,
            stages: HashMap::new(),
            programs: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> u32 {
        self.next += 1;
        self.next
    }
}

fn declared_uniforms(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.trim().strip_prefix("uniform "))
        .filter_map(|rest| rest.split_whitespace().nth(1))
        .map(|name| name.trim_end_matches(';').to_string())
        .collect()
}

impl GraphicsApi for RecordingApi {
    fn backend_name(&self) -> &'static str {
        "recording"
    }

    fn compile_stage(&mut self, _kind: StageKind, source: &str) -> Result<RawStage, String> {
        self.counters.compiles.fetch_add(1, Ordering::SeqCst);
        if !self.compile_delay.is_zero() {
            thread::sleep(self.compile_delay);
        }

        if source.contains(DRIVER_CRASH) {
            panic!("driver crashed while compiling");
        }

        if let Some(index) = source.lines().position(|line| line.contains(COMPILE_ERROR)) {
            return Err(format!(
                "0:{}(5): error: syntax error, unexpected IDENTIFIER\n",
                index + 1
            ));
        }

        let id = self.allocate();
        self.stages.insert(
            id,
            Stage {
                uniforms: declared_uniforms(source),
                fails_link: source.contains(LINK_ERROR),
            },
        );
        Ok(RawStage(id))
    }

    fn delete_stage(&mut self, stage: RawStage) {
        self.counters.stages_deleted.fetch_add(1, Ordering::SeqCst);
        self.stages.remove(&stage.0);
    }

    fn create_program(&mut self) -> Result<RawProgram, String> {
        self.counters.programs_created.fetch_add(1, Ordering::SeqCst);
        let id = self.allocate();
        self.programs.insert(id, Program::default());
        Ok(RawProgram(id))
    }

    fn attach_stage(&mut self, program: RawProgram, stage: RawStage) {
        if let Some(program) = self.programs.get_mut(&program.0) {
            program.attached.push(stage.0);
        }
    }

    fn detach_stage(&mut self, program: RawProgram, stage: RawStage) {
        if let Some(program) = self.programs.get_mut(&program.0) {
            program.attached.retain(|attached| *attached != stage.0);
        }
    }

    fn link_program(&mut self, program: RawProgram) -> Result<(), String> {
        self.counters.links.fetch_add(1, Ordering::SeqCst);
        let attached = self
            .programs
            .get(&program.0)
            .map(|program| program.attached.clone())
            .unwrap_or_default();

        let mut uniforms: Vec<String> = Vec::new();
        for stage in attached.iter().filter_map(|id| self.stages.get(id)) {
            if stage.fails_link {
                return Err("error: LINK_ERROR: vertex and fragment interfaces differ".into());
            }
            for name in &stage.uniforms {
                if !uniforms.contains(name) {
                    uniforms.push(name.clone());
                }
            }
        }

        if let Some(program) = self.programs.get_mut(&program.0) {
            program.uniforms = uniforms;
        }
        Ok(())
    }

    fn validate_program(&mut self, _program: RawProgram) -> Result<(), String> {
        Ok(())
    }

    fn delete_program(&mut self, program: RawProgram) {
        self.counters.programs_deleted.fetch_add(1, Ordering::SeqCst);
        self.programs.remove(&program.0);
    }

    fn uniform_location(&mut self, program: RawProgram, name: &str) -> Option<Location> {
        let program = self.programs.get(&program.0)?;
        let index = program.uniforms.iter().position(|uniform| uniform == name)?;
        Location::new(index as i32)
    }

    fn attribute_location(&mut self, _program: RawProgram, name: &str) -> Option<Location> {
        (name == "position").then(|| Location::new(0)).flatten()
    }

    fn active_uniforms(&mut self, program: RawProgram) -> Vec<UniformInfo> {
        self.programs
            .get(&program.0)
            .map(|program| {
                program
                    .uniforms
                    .iter()
                    .enumerate()
                    .map(|(index, name)| UniformInfo {
                        name: name.clone(),
                        location: Location::new(index as i32),
                        kind: UniformKind::Other,
                        size: 1,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn use_program(&mut self, program: Option<RawProgram>) {
        self.counters.binds.fetch_add(1, Ordering::SeqCst);
        self.counters
            .bound
            .store(program.map_or(0, |program| program.0), Ordering::SeqCst);
    }

    fn set_uniform(&mut self, _program: RawProgram, _location: Location, _value: &UniformValue) {
        self.counters.uniform_writes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn recording_registry(loader: Arc<dyn SourceLoader>) -> (ShaderRegistry, Arc<Counters>) {
    recording_registry_with_delay(loader, Duration::ZERO)
}

pub fn recording_registry_with_delay(
    loader: Arc<dyn SourceLoader>,
    compile_delay: Duration,
) -> (ShaderRegistry, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let shared = Arc::clone(&counters);
    let gpu = GpuThread::spawn("recording-gpu", move || {
        Ok(RecordingApi::new(shared, compile_delay))
    })
    .expect("spawn recording backend");
    (
        ShaderRegistry::new(loader, gpu, RegistryOptions::default()),
        counters,
    )
}

/// Waits until every job queued so far on the graphics thread has run.
pub fn flush(registry: &ShaderRegistry) {
    registry.run(|_| ()).expect("graphics thread alive");
}

pub const SOLID: &str = "#version 410 core
uniform mat4 mvp;

#pragma vertex
layout(location = 0) in vec3 position;

@entry void vertex() {
    gl_Position = mvp * vec4(position, 1.0);
}

#pragma fragment
uniform vec4 tint;
out vec4 FragColor;

@entry void fragment() {
    FragColor = tint;
}
";
