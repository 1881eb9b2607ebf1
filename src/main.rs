use anyhow::Context;
use clap::Parser;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use dumpfilter::logging::init_logging;
use dumpfilter::{schedule, Cli, Config, RunMode};

fn main() {
    let args = Cli::parse();

    if let Err(e) = init_logging(args.log_level) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Cli) -> anyhow::Result<()> {
    let config = Config::load(&args)?;

    // A one-shot run keeps the default signal action
    let shutdown = Arc::new(AtomicBool::new(false));
    if config.mode == RunMode::Schedule {
        schedule::shutdown_on_signals(&shutdown).context("install signal handlers")?;
    }

    schedule::run(&config, &shutdown, |result| {
        println!("filtered lines: {}/{}", result.filtered_lines, result.total_lines);
        println!("output: {}", result.output_path.display());
    })
}
