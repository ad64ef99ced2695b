use tracing::{debug, info, warn};
use unified::SplitShader;

use crate::api::GraphicsApi;
use crate::error::BuildError;
use crate::program::ShaderProgram;
use crate::stage::{compile_stage, CompiledStage};

/// Attaches and links `stages` into a new program.
///
/// The stages are consumed: on success they are detached and released, on
/// failure they are released together with the unlinked program and the raw
/// link log is returned. Validation, when requested, only logs.
pub fn link_program(
    api: &mut dyn GraphicsApi,
    stages: Vec<CompiledStage>,
    validate: bool,
) -> Result<ShaderProgram, BuildError> {
    let program = match api.create_program() {
        Ok(program) => program,
        Err(log) => {
            release_all(api, stages);
            return Err(BuildError::Link { log });
        }
    };

    for stage in &stages {
        api.attach_stage(program, stage.raw());
    }

    if let Err(log) = api.link_program(program) {
        for stage in &stages {
            api.detach_stage(program, stage.raw());
        }
        release_all(api, stages);
        api.delete_program(program);
        return Err(BuildError::Link { log });
    }

    let kinds = stages.iter().map(CompiledStage::kind).collect::<Vec<_>>();
    for stage in stages {
        api.detach_stage(program, stage.raw());
        stage.release(api);
    }

    if validate {
        if let Err(log) = api.validate_program(program) {
            warn!(program = program.0, log = %log.trim(), "program validation reported a problem");
        }
    }

    debug!(program = program.0, stages = ?kinds, "linked program");
    Ok(ShaderProgram::new(program, kinds))
}

/// Compiles every stage of `shader` in file order and links the result.
///
/// Stops at the first stage that fails to compile and releases the stages
/// compiled before it.
pub fn build_program(
    api: &mut dyn GraphicsApi,
    shader: &SplitShader,
    validate: bool,
) -> Result<ShaderProgram, BuildError> {
    let mut compiled = Vec::with_capacity(shader.stages().len());
    for block in shader.stages() {
        match compile_stage(api, block) {
            Ok(stage) => compiled.push(stage),
            Err(err) => {
                release_all(api, compiled);
                return Err(err);
            }
        }
    }

    let program = link_program(api, compiled, validate)?;
    info!(
        shader = shader.name(),
        backend = api.backend_name(),
        stages = program.stages().len(),
        "built shader program"
    );
    Ok(program)
}

fn release_all(api: &mut dyn GraphicsApi, stages: Vec<CompiledStage>) {
    for stage in stages {
        stage.release(api);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Location, RawProgram, RawStage, UniformInfo, UniformValue};
    use unified::{split_text, SplitOptions, StageKind};

    /// Tracks live objects so tests can check nothing leaks.
    #[derive(Default)]
    struct Ledger {
        next: u32,
        live_stages: Vec<u32>,
        live_programs: Vec<u32>,
        attached: Vec<(u32, u32)>,
        compiles: usize,
        fail_compile: Option<StageKind>,
        fail_link: bool,
        fail_validate: bool,
    }

    impl GraphicsApi for Ledger {
        fn backend_name(&self) -> &'static str {
            "ledger"
        }

        fn compile_stage(&mut self, kind: StageKind, _source: &str) -> Result<RawStage, String> {
            self.compiles += 1;
            if self.fail_compile == Some(kind) {
                return Err("0:2(1): error: syntax error".into());
            }
            self.next += 1;
            self.live_stages.push(self.next);
            Ok(RawStage(self.next))
        }

        fn delete_stage(&mut self, stage: RawStage) {
            self.live_stages.retain(|live| *live != stage.0);
        }

        fn create_program(&mut self) -> Result<RawProgram, String> {
            self.next += 1;
            self.live_programs.push(self.next);
            Ok(RawProgram(self.next))
        }

        fn attach_stage(&mut self, program: RawProgram, stage: RawStage) {
            self.attached.push((program.0, stage.0));
        }

        fn detach_stage(&mut self, program: RawProgram, stage: RawStage) {
            self.attached.retain(|pair| *pair != (program.0, stage.0));
        }

        fn link_program(&mut self, _program: RawProgram) -> Result<(), String> {
            if self.fail_link {
                Err("error: vertex output `v_uv' not read by fragment shader".into())
            } else {
                Ok(())
            }
        }

        fn validate_program(&mut self, _program: RawProgram) -> Result<(), String> {
            if self.fail_validate {
                Err("no vertex array bound".into())
            } else {
                Ok(())
            }
        }

        fn delete_program(&mut self, program: RawProgram) {
            self.live_programs.retain(|live| *live != program.0);
        }

        fn uniform_location(&mut self, _program: RawProgram, _name: &str) -> Option<Location> {
            None
        }

        fn attribute_location(&mut self, _program: RawProgram, _name: &str) -> Option<Location> {
            None
        }

        fn active_uniforms(&mut self, _program: RawProgram) -> Vec<UniformInfo> {
            Vec::new()
        }

        fn use_program(&mut self, _program: Option<RawProgram>) {}

        fn set_uniform(
            &mut self,
            _program: RawProgram,
            _location: Location,
            _value: &UniformValue,
        ) {
        }
    }

    const SOURCE: &str = "#version 410 core
#pragma vertex
@entry void vertex() { gl_Position = vec4(0); }
#pragma geometry
@entry void geometry() { EmitVertex(); }
#pragma fragment
out vec4 FragColor;
@entry void fragment() { FragColor = vec4(1); }
";

    fn shader() -> SplitShader {
        split_text("ledger", SOURCE, &SplitOptions::default()).unwrap()
    }

    #[test]
    fn successful_link_releases_stages() {
        let mut api = Ledger::default();
        let program = build_program(&mut api, &shader(), true).expect("build");
        assert_eq!(
            program.stages(),
            &[StageKind::Vertex, StageKind::Geometry, StageKind::Fragment]
        );
        assert!(api.live_stages.is_empty());
        assert!(api.attached.is_empty());
        assert_eq!(api.live_programs, vec![program.raw().0]);

        program.destroy(&mut api);
        assert!(api.live_programs.is_empty());
    }

    #[test]
    fn compile_failure_releases_earlier_stages() {
        let mut api = Ledger {
            fail_compile: Some(StageKind::Geometry),
            ..Ledger::default()
        };
        let err = build_program(&mut api, &shader(), true).unwrap_err();
        match err {
            BuildError::StageCompile { stage, diagnostics } => {
                assert_eq!(stage, StageKind::Geometry);
                // Header is one line; the geometry body starts on line 5.
                assert_eq!(diagnostics[0].line, Some(5));
            }
            other => panic!("expected StageCompile, got {other:?}"),
        }
        assert_eq!(api.compiles, 2);
        assert!(api.live_stages.is_empty());
        assert!(api.live_programs.is_empty());
    }

    #[test]
    fn link_failure_releases_everything_and_keeps_log() {
        let mut api = Ledger {
            fail_link: true,
            ..Ledger::default()
        };
        let err = build_program(&mut api, &shader(), true).unwrap_err();
        assert_eq!(
            err,
            BuildError::Link {
                log: "error: vertex output `v_uv' not read by fragment shader".into()
            }
        );
        assert!(api.live_stages.is_empty());
        assert!(api.live_programs.is_empty());
        assert!(api.attached.is_empty());
    }

    #[test]
    fn validation_failure_is_advisory() {
        let mut api = Ledger {
            fail_validate: true,
            ..Ledger::default()
        };
        let program = build_program(&mut api, &shader(), true).expect("validation only warns");
        program.destroy(&mut api);
    }

    #[test]
    fn dropping_an_undestroyed_program_leaks_it() {
        let mut api = Ledger::default();
        let program = build_program(&mut api, &shader(), true).expect("build");
        let raw = program.raw().0;
        assert!(!program.is_destroyed());

        drop(program);
        assert_eq!(api.live_programs, vec![raw]);
    }

    #[test]
    fn stages_start_unreleased() {
        let mut api = Ledger::default();
        let shader = shader();
        let stage = compile_stage(&mut api, &shader.stages()[0]).expect("compile");
        assert!(!stage.is_released());
        assert_eq!(api.live_stages, vec![stage.raw().0]);

        stage.release(&mut api);
        assert!(api.live_stages.is_empty());
    }
}
