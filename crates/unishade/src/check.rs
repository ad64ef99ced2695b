use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use compiler::{build_program, BuildError, GpuThread};
use registry::RegistryOptions;
use serde::Serialize;
use unified::{split, ShaderSource, SplitError, SplitShader};

use crate::cli::CheckArgs;

#[derive(Debug, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub ok: bool,
    pub stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<DiagnosticReport>,
}

#[derive(Debug, Serialize)]
pub struct DiagnosticReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
}

impl FileReport {
    fn passed(file: &Path, stages: Vec<String>) -> Self {
        Self {
            file: file.to_path_buf(),
            ok: true,
            stages,
            error: None,
            diagnostics: Vec::new(),
        }
    }

    fn failed(file: &Path, stages: Vec<String>, error: String) -> Self {
        Self {
            file: file.to_path_buf(),
            ok: false,
            stages,
            error: Some(error),
            diagnostics: Vec::new(),
        }
    }
}

/// Checks every file and prints the results. Returns `false` if any failed.
pub fn run_check(args: CheckArgs, options: &RegistryOptions) -> Result<bool> {
    let gpu = if args.compile {
        Some(GpuThread::headless("unishade-naga")?)
    } else {
        None
    };

    let reports: Vec<FileReport> = args
        .files
        .iter()
        .map(|file| check_file(file, options, gpu.as_ref()))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print_report(report);
        }
    }

    Ok(reports.iter().all(|report| report.ok))
}

pub fn check_file(file: &Path, options: &RegistryOptions, gpu: Option<&GpuThread>) -> FileReport {
    let source = match read_source(file) {
        Ok(source) => source,
        Err(err) => return FileReport::failed(file, Vec::new(), err),
    };

    let shader = match split(&source, &options.split) {
        Ok(shader) => shader,
        Err(err) => {
            let mut report = FileReport::failed(file, Vec::new(), err.to_string());
            report.diagnostics = split_diagnostics(&err);
            return report;
        }
    };

    let stages = stage_names(&shader);
    let Some(gpu) = gpu else {
        return FileReport::passed(file, stages);
    };

    let validate = options.validate_after_link;
    let outcome = gpu.call(move |api| {
        build_program(api, &shader, validate).map(|program| program.destroy(api))
    });

    match outcome.map_err(BuildError::from).and_then(|built| built) {
        Ok(()) => FileReport::passed(file, stages),
        Err(err) => {
            let mut report = FileReport::failed(file, stages, err.to_string());
            report.diagnostics = build_diagnostics(&err);
            report
        }
    }
}

fn read_source(file: &Path) -> Result<ShaderSource, String> {
    let text = fs::read_to_string(file)
        .map_err(|err| format!("failed to read {}: {err}", file.display()))?;
    let name = file
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("shader")
        .to_string();
    Ok(ShaderSource::new(name, text).with_path(file))
}

fn stage_names(shader: &SplitShader) -> Vec<String> {
    shader.kinds().iter().map(ToString::to_string).collect()
}

fn split_diagnostics(err: &SplitError) -> Vec<DiagnosticReport> {
    match err {
        SplitError::MalformedStage {
            stage,
            lines,
            reason,
        } => vec![DiagnosticReport {
            stage: stage.map(|kind| kind.to_string()),
            line: Some(lines.start),
            message: reason.clone(),
        }],
        _ => Vec::new(),
    }
}

fn build_diagnostics(err: &BuildError) -> Vec<DiagnosticReport> {
    match err {
        BuildError::StageCompile { stage, diagnostics } => diagnostics
            .iter()
            .map(|diagnostic| DiagnosticReport {
                stage: Some(stage.to_string()),
                line: diagnostic.line,
                message: diagnostic.message.clone(),
            })
            .collect(),
        BuildError::Link { log } => log
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| DiagnosticReport {
                stage: None,
                line: None,
                message: line.to_string(),
            })
            .collect(),
        BuildError::Gpu(_) => Vec::new(),
    }
}

fn print_report(report: &FileReport) {
    if report.ok {
        println!("ok     {} ({})", report.file.display(), report.stages.join(", "));
        return;
    }

    println!("FAILED {}", report.file.display());
    if let Some(error) = &report.error {
        for line in error.lines() {
            println!("  {line}");
        }
    }
}
