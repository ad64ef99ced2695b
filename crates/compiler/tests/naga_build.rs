use compiler::{build_program, BuildError, GpuThread};
use unified::{split_text, SplitOptions, SplitShader, StageKind};

const GRADIENT: &str = "#version 450
layout(set = 0, binding = 0) uniform Params {
    float scale;
} params;

#pragma vertex
layout(location = 0) in vec3 position;
layout(location = 0) out vec3 v_color;

@entry void vertex_main() {
    v_color = position * params.scale;
    gl_Position = vec4(position, 1.0);
}

#pragma fragment
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 frag;

@entry void fragment_main() {
    frag = vec4(v_color, 1.0);
}
";

fn split(text: &str) -> SplitShader {
    split_text("gradient.glsl", text, &SplitOptions::default()).expect("split")
}

fn build(shader: SplitShader) -> Result<Vec<StageKind>, BuildError> {
    let gpu = GpuThread::headless("naga-test").expect("spawn headless backend");
    gpu.call(move |api| {
        build_program(api, &shader, true).map(|program| {
            let stages = program.stages().to_vec();
            program.destroy(api);
            stages
        })
    })
    .expect("graphics thread alive")
}

#[test]
fn builds_vertex_and_fragment_program() {
    let stages = build(split(GRADIENT)).expect("program builds");
    assert_eq!(stages, vec![StageKind::Vertex, StageKind::Fragment]);
}

#[test]
fn compile_errors_point_into_the_unified_file() {
    let broken = GRADIENT.replace(
        "frag = vec4(v_color, 1.0);",
        "frag = vec4(undeclared_value, 1.0);",
    );
    let line = broken
        .lines()
        .position(|line| line.contains("undeclared_value"))
        .map(|index| index as u32 + 1)
        .unwrap();

    match build(split(&broken)) {
        Err(BuildError::StageCompile { stage, diagnostics }) => {
            assert_eq!(stage, StageKind::Fragment);
            assert!(
                diagnostics.iter().any(|diagnostic| diagnostic.line == Some(line)),
                "expected a diagnostic on line {line}: {diagnostics:?}"
            );
        }
        other => panic!("expected StageCompile, got {other:?}"),
    }
}

#[test]
fn unmatched_fragment_input_fails_to_link() {
    let mismatched = GRADIENT
        .replace(
            "layout(location = 0) in vec3 v_color;",
            "layout(location = 0) in vec3 v_color;\nlayout(location = 3) in vec3 v_normal;",
        )
        .replace("frag = vec4(v_color, 1.0);", "frag = vec4(v_color + v_normal, 1.0);");

    match build(split(&mismatched)) {
        Err(BuildError::Link { log }) => {
            assert!(log.contains("location 3"), "{log}");
        }
        other => panic!("expected Link error, got {other:?}"),
    }
}

#[test]
fn geometry_stage_is_reported_as_a_compile_error() {
    let with_geometry = GRADIENT.replace(
        "#pragma fragment",
        "#pragma geometry\nlayout(points) in;\nlayout(points, max_vertices = 1) out;\n@entry void emit() { EmitVertex(); }\n#pragma fragment",
    );
    match build(split(&with_geometry)) {
        Err(BuildError::StageCompile { stage, .. }) => assert_eq!(stage, StageKind::Geometry),
        other => panic!("expected StageCompile, got {other:?}"),
    }
}
