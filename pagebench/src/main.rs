use std::{
    io::{self, IsTerminal},
    process::ExitCode,
};

use clap::Parser;
use tracing::{error, level_filters::LevelFilter};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use crate::{
    config::{Opt, RunConfig},
    error::{ConfigError, EXIT_CONFIG, EXIT_FATAL},
    platform::Linux,
};

mod bench;
mod config;
mod error;
mod layout;
mod platform;
mod region;
mod registrar;
mod report;
#[cfg(test)]
mod tests;
mod timer;
mod warmup;

fn main() -> ExitCode {
    // stdout is reserved for the report
    let registry = Registry::default().with(
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            ),
    );
    tracing::dispatcher::set_global_default(registry.into()).expect("failed to set global default subscriber");

    let opt: Opt = Opt::parse();
    ExitCode::from(execute(&opt) as u8)
}

// returns the process status. negative statuses are truncated to a byte by the caller.
fn execute(opt: &Opt) -> i32 {
    let (cfg, errors) = RunConfig::scan(opt);
    for err in errors.iter() {
        error!("{}", err);
    }
    let status = config_status(&errors);

    let platform = match Linux::new() {
        Ok(platform) => platform,
        Err(err) => {
            error!("{:#}", err);
            return EXIT_FATAL;
        }
    };
    match bench::run(&cfg, &platform) {
        Ok(report) => {
            println!("{}", report);
            status
        }
        Err(err) => {
            error!("{:#}", err);
            err.exit_code()
        }
    }
}

// configuration errors don't stop the run, but the process still fails
fn config_status(errors: &[ConfigError]) -> i32 {
    if errors.is_empty() {
        0
    } else {
        EXIT_CONFIG
    }
}
