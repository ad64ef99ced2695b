mod check;
mod cli;
mod dump;
mod run;
mod watch;

use std::process::ExitCode;

use anyhow::Result;
use cli::Command;
use registry::RegistryOptions;

fn main() -> Result<ExitCode> {
    let cli = cli::parse();
    run::initialise_tracing();

    let config = run::load_config(cli.config.as_deref())?;
    let options = RegistryOptions::from(&config);

    match cli.command {
        Command::Check(args) => {
            if check::run_check(args, &options)? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Split(args) => {
            dump::run_split(args, &options)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch(args) => {
            watch::run_watch(args, config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
