mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use config::SiteConfig;
use controller::TracingOutputs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Scenario {
    Normal,
    RushHour,
    Emergency,
    Starvation,
    ReaderDropout,
}

impl From<Scenario> for sim::Scenario {
    fn from(s: Scenario) -> Self {
        match s {
            Scenario::Normal => sim::Scenario::Normal,
            Scenario::RushHour => sim::Scenario::RushHourA,
            Scenario::Emergency => sim::Scenario::Emergency,
            Scenario::Starvation => sim::Scenario::Starvation,
            Scenario::ReaderDropout => sim::Scenario::ReaderDropout,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "intersection-control",
    version,
    about = "Two-approach adaptive traffic signal controller over a local bus"
)]
struct Args {
    #[arg(value_enum, long, default_value = "normal")]
    scenario: Scenario,

    /// Simulated run length in seconds
    #[arg(long, default_value_t = 180.0)]
    seconds: f64,

    /// Control loop period in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// RNG seed for deterministic traffic
    #[arg(long, default_value_t = 12345)]
    seed: u64,

    /// JSON site file (bus, timing, pins, detectors)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the team id used in topic names
    #[arg(long)]
    team: Option<String>,

    /// Pace the run against the wall clock
    #[arg(long)]
    realtime: bool,
}

#[derive(serde::Serialize)]
struct TraceRow<'a> {
    t_ms: u64,
    topic: &'a str,
    payload: serde_json::Value,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.tick_ms == 0 {
        bail!("--tick-ms must be positive");
    }
    if !(args.seconds.is_finite() && args.seconds >= 0.0) {
        bail!("--seconds must be a non-negative number");
    }

    let mut site = match &args.config {
        Some(path) => SiteConfig::load(path)?,
        None => SiteConfig::default(),
    };
    if let Some(team) = &args.team {
        site.bus.team_id = team.clone();
    }

    let scenario = sim::Scenario::from(args.scenario);
    let detectors = if site.detectors.is_empty() {
        scenario.detectors()
    } else {
        site.detectors.clone()
    };
    let outputs = TracingOutputs::new(site.pins);
    let mut x = scenario
        .build_with(site.controller_setup(), &detectors, args.seed, outputs)
        .context("controller configuration rejected")?;
    info!(scenario = scenario.label(), seed = args.seed, "run starting");

    let end_ms = (args.seconds * 1000.0).round() as u64;
    let started = Instant::now();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let mut t = 0;
    while t <= end_ms {
        if args.realtime {
            let target = Duration::from_millis(t);
            if let Some(wait) = target.checked_sub(started.elapsed()) {
                std::thread::sleep(wait);
            }
        }
        for msg in x.step(t) {
            let payload = serde_json::from_slice(&msg.payload).unwrap_or_else(|_| {
                serde_json::Value::String(String::from_utf8_lossy(&msg.payload).into())
            });
            let row = TraceRow {
                t_ms: t,
                topic: &msg.topic,
                payload,
            };
            serde_json::to_writer(&mut out, &row)?;
            out.write_all(b"\n")?;
        }
        t = next_time(x.next_wakeup_ms(), t, args.tick_ms);
    }
    out.flush()?;

    let ctl = x.control();
    info!(
        transitions = x.transitions().len(),
        dropped_events = ctl.dropped_events(),
        publish_failures = ctl.publish_failures(),
        fail_safe = ctl.fail_safe(),
        "run finished"
    );
    Ok(())
}

/// Next loop instant: one period on, or sooner if a deadline falls due first.
fn next_time(wakeup_ms: Option<u64>, t: u64, tick_ms: u64) -> u64 {
    let tick = t + tick_ms;
    match wakeup_ms {
        Some(due) if due > t && due < tick => due,
        _ => tick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_wakes_for_deadlines_inside_the_period() {
        assert_eq!(next_time(Some(20_000), 19_800, 900), 20_000);
        assert_eq!(next_time(Some(25_000), 19_800, 900), 20_700);
        assert_eq!(next_time(Some(19_800), 19_800, 900), 20_700);
        assert_eq!(next_time(None, 0, 100), 100);
    }

    #[test]
    fn off_grid_period_switches_on_time() {
        let scenario = sim::Scenario::RushHourA;
        let setup = controller::ControllerSetup::default();
        let outputs = TracingOutputs::new(setup.pins);
        let mut x = scenario
            .build_with(setup, &scenario.detectors(), 4, outputs)
            .unwrap();
        let mut t = 0;
        let mut seen = Vec::new();
        while t <= 300_000 {
            x.step(t);
            seen.push((t, x.control().controller().phase_elapsed_ms()));
            t = next_time(x.next_wakeup_ms(), t, 900);
        }
        for (at, elapsed) in seen {
            assert!(elapsed <= 20_000, "green held {elapsed} ms at {at}");
        }
    }
}
