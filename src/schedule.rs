use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::{Config, RunMode};
use crate::pipeline::{self, PipelineOptions, PipelineResult};

/// Longest sleep between shutdown checks while waiting for the next tick
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Run the pipeline according to the configured mode.
///
/// `report` is called with the result of every successful run.
pub fn run<F>(config: &Config, shutdown: &AtomicBool, report: F) -> Result<()>
where
    F: FnMut(&PipelineResult),
{
    let options = config.pipeline_options();
    match config.mode {
        RunMode::Once => run_once(&options, report),
        RunMode::Schedule => run_every(&options, config.schedule_interval, shutdown, report),
    }
}

pub fn run_once<F>(options: &PipelineOptions, mut report: F) -> Result<()>
where
    F: FnMut(&PipelineResult),
{
    let result = pipeline::run(options).context("filter run failed")?;
    report(&result);
    Ok(())
}

/// Run immediately, then once per `interval` until `shutdown` is raised.
///
/// A failing first run is returned as an error. Later failures are logged
/// and the loop waits for the next tick. Ticks missed while a run was in
/// progress collapse into a single immediate run. `shutdown` is only
/// checked between runs.
pub fn run_every<F>(options: &PipelineOptions, interval: Duration, shutdown: &AtomicBool, mut report: F) -> Result<()>
where
    F: FnMut(&PipelineResult),
{
    let mut next_tick = Instant::now() + interval;
    run_once(options, &mut report)?;

    loop {
        if !wait_until(next_tick, shutdown) {
            info!("shutdown requested, stopping scheduler");
            return Ok(());
        }

        if let Err(e) = run_once(options, &mut report) {
            error!(error = %format!("{:#}", e), "scheduled run failed");
        }

        let now = Instant::now();
        next_tick += interval;
        while next_tick <= now {
            next_tick += interval;
        }
    }
}

/// Raise `shutdown` on SIGINT or SIGTERM.
///
/// A second signal that arrives before the flag is observed exits the
/// process with status 1.
pub fn shutdown_on_signals(shutdown: &Arc<AtomicBool>) -> io::Result<()> {
    for signal in [SIGINT, SIGTERM] {
        // conditional handler first: it must see the flag before this signal sets it
        flag::register_conditional_shutdown(signal, 1, Arc::clone(shutdown))?;
        flag::register(signal, Arc::clone(shutdown))?;
    }
    Ok(())
}

/// Sleep until `deadline`; false if shutdown was raised first
fn wait_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}
