#[macro_use]
extern crate tracing;

mod cli;
mod run;

use std::process::ExitCode;

use clap::Parser as _;
use gapitrace_replay::ReplayOptions;

fn main() -> anyhow::Result<ExitCode> {
    let args = cli::Args::parse();
    let exit_on_any_error = args.exit_on_any_error;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();

    let options: ReplayOptions = args.into();

    for loop_index in 0..options.num_loops {
        debug!(loop_index, "starting replay loop");
        match run::replay(&options) {
            Ok(summary) => {
                info!(?summary, loop_index, "loop finished");
            }
            Err(error) => {
                error!(error = %error.report(), loop_index, "replay failed");
                if exit_on_any_error {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
