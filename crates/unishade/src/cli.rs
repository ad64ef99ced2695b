use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use unified::StageKind;

#[derive(Parser, Debug)]
#[command(
    name = "unishade",
    author,
    version,
    about = "Check, split and watch unified GLSL shader files",
    arg_required_else_help = true
)]
pub struct Cli {
    /// Registry configuration file (defaults to the user config directory).
    #[arg(long, global = true, value_name = "FILE", env = "UNISHADE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Split each file and report problems; `--compile` also compiles and links.
    Check(CheckArgs),
    /// Print the derived per-stage sources of a unified file.
    Split(SplitArgs),
    /// Load shaders by name and rebuild them whenever their files change.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Unified shader files to check.
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,

    /// Compile and link with the headless backend after splitting.
    #[arg(long)]
    pub compile: bool,

    /// Emit a JSON report on stdout instead of text.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SplitArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Only print this stage (`vertex`, `fragment`, `geometry`, ...).
    #[arg(long, value_name = "KIND", value_parser = parse_stage)]
    pub stage: Option<StageKind>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Logical shader names, resolved against the configured roots.
    #[arg(value_name = "NAME", required = true)]
    pub names: Vec<String>,

    /// Extra search roots, tried before the configured ones.
    #[arg(long = "root", value_name = "DIR")]
    pub roots: Vec<PathBuf>,

    /// Poll interval, overriding `reload_interval` (e.g. `250ms`, `2s`).
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Stop after this many polls instead of running until interrupted.
    #[arg(long, value_name = "N")]
    pub polls: Option<u64>,
}

pub fn parse() -> Cli {
    Cli::parse()
}

fn parse_stage(value: &str) -> Result<StageKind, String> {
    StageKind::from_pragma(value).ok_or_else(|| {
        let known = StageKind::ALL
            .iter()
            .map(|kind| kind.pragma_name())
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown stage '{value}' (expected one of: {known})")
    })
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value).map_err(|err| err.to_string())?;
    if duration.is_zero() {
        return Err("interval must be greater than zero".into());
    }
    Ok(duration)
}
