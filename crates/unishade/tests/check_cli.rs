use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

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

fn unishade(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_unishade"))
        .env("UNISHADE_CONFIG_DIR", config_dir)
        .env_remove("UNISHADE_CONFIG")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("failed to run unishade")
}

fn write_shader(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, text).unwrap();
    path
}

fn bundled(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../shaders")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn check_splits_every_bundled_shader() {
    let root = TempDir::new().unwrap();
    let output = unishade(
        root.path(),
        &[
            "check",
            &bundled("phong.glsl"),
            &bundled("solid.glsl"),
            &bundled("advanced/normals.glsl"),
            &bundled("advanced/mesh.glsl"),
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("vertex, geometry, fragment"));
}

#[test]
fn check_compiles_bundled_shaders_headless() {
    let root = TempDir::new().unwrap();
    let output = unishade(
        root.path(),
        &[
            "check",
            "--compile",
            "--json",
            &bundled("phong.glsl"),
            &bundled("solid.glsl"),
            &bundled("advanced/mesh.glsl"),
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    for file in report.as_array().unwrap() {
        assert_eq!(file["ok"], true, "{file}");
        assert_eq!(file["stages"], serde_json::json!(["vertex", "fragment"]));
    }
}

#[test]
fn check_compile_reports_geometry_as_unsupported_by_naga() {
    let root = TempDir::new().unwrap();
    let output = unishade(
        root.path(),
        &["check", "--compile", &bundled("advanced/normals.glsl")],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!output.status.success());
    assert!(stdout.contains("geometry stage failed to compile"), "stdout: {stdout}");
    assert!(stdout.contains("not supported by the naga backend"));
}

#[test]
fn watch_builds_bundled_shader() {
    let root = TempDir::new().unwrap();
    let shaders = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../shaders");
    let output = unishade(
        root.path(),
        &[
            "watch",
            "solid.glsl",
            "--root",
            shaders.to_str().unwrap(),
            "--interval",
            "10ms",
            "--polls",
            "1",
        ],
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("ready   solid.glsl (vertex, fragment)"), "stdout: {stdout}");
}

#[test]
fn check_fails_on_missing_fragment_stage() {
    let root = TempDir::new().unwrap();
    let file = write_shader(
        root.path(),
        "vertex_only.glsl",
        "#version 410 core\n#pragma vertex\n@entry void vs() { gl_Position = vec4(0.0); }\n",
    );

    let output = unishade(root.path(), &["check", file.to_str().unwrap()]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(!output.status.success());
    assert!(stdout.contains("FAILED"));
    assert!(stdout.contains("missing fragment stage"), "stdout: {stdout}");
}

#[test]
fn check_json_reports_remapped_compile_errors() {
    let root = TempDir::new().unwrap();
    let good = write_shader(root.path(), "gradient.glsl", GRADIENT);
    let broken_text = GRADIENT.replace(
        "frag = vec4(v_color, 1.0);",
        "frag = vec4(missing_value, 1.0);",
    );
    let broken_line = broken_text
        .lines()
        .position(|line| line.contains("missing_value"))
        .map(|index| index as u64 + 1)
        .unwrap();
    let broken = write_shader(root.path(), "broken.glsl", &broken_text);

    let output = unishade(
        root.path(),
        &[
            "check",
            "--compile",
            "--json",
            good.to_str().unwrap(),
            broken.to_str().unwrap(),
        ],
    );
    assert!(!output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json report");
    let files = report.as_array().unwrap();
    assert_eq!(files.len(), 2);

    assert_eq!(files[0]["ok"], true);
    assert_eq!(files[0]["stages"], serde_json::json!(["vertex", "fragment"]));

    assert_eq!(files[1]["ok"], false);
    let diagnostics = files[1]["diagnostics"].as_array().unwrap();
    assert!(diagnostics
        .iter()
        .any(|diagnostic| diagnostic["stage"] == "fragment"
            && diagnostic["line"].as_u64() == Some(broken_line)));
}

#[test]
fn split_prints_requested_stage_with_main_entry() {
    let root = TempDir::new().unwrap();
    let output = unishade(
        root.path(),
        &["split", &bundled("phong.glsl"), "--stage", "fragment"],
    );
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("fragment stage"));
    assert!(!stdout.contains("vertex stage"));
    assert!(stdout.contains("void main()"));
    assert!(!stdout.contains("@entry"));
}

#[test]
fn split_rejects_absent_stage() {
    let root = TempDir::new().unwrap();
    let output = unishade(
        root.path(),
        &["split", &bundled("solid.glsl"), "--stage", "geometry"],
    );
    assert!(!output.status.success());
}

#[test]
fn watch_loads_names_from_config_roots() {
    let root = TempDir::new().unwrap();
    let shaders = root.path().join("library");
    fs::create_dir_all(&shaders).unwrap();
    write_shader(&shaders, "gradient.glsl", GRADIENT);
    fs::write(
        root.path().join("config.toml"),
        format!(
            "roots = [\"{}\"]\nreload_interval = \"10ms\"\n",
            shaders.display()
        ),
    )
    .unwrap();

    let output = unishade(root.path(), &["watch", "gradient.glsl", "--polls", "2"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "stdout: {stdout}");
    assert!(stdout.contains("ready   gradient.glsl (vertex, fragment)"));
}

#[test]
fn explicit_config_must_exist() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nope.toml");
    let output = unishade(
        root.path(),
        &["--config", missing.to_str().unwrap(), "check", &bundled("solid.glsl")],
    );
    assert!(!output.status.success());
}
