//! The `astrons` command-line entry point.

use astrons_engine::RealTimeConfig;
use astrons_runner::{run, RunOptions};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// astroNS aerospace network simulator.
#[derive(Debug, Parser)]
#[command(name = "astrons", version, about)]
struct Cli {
    /// Network model file (.yml, .json or .ini).
    model_file: PathBuf,

    /// Random seed; drawn from OS entropy when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Virtual end time, in sim seconds.
    #[arg(long, default_value_t = 200.0)]
    end_simtime: f64,

    /// ISO-8601 wall datetime mapped to virtual time zero. Defaults to now.
    #[arg(long)]
    epoch: Option<String>,

    /// Write the trace to the terminal instead of simulation.log.
    #[arg(long)]
    terminal: bool,

    /// Emit per-node statistics artifacts.
    #[arg(long)]
    node_stats: bool,

    /// Emit per-node statistics plus each node's full message history.
    #[arg(long)]
    node_stats_history: bool,

    /// Dump the final state of every node.
    #[arg(long)]
    final_node_states: bool,

    /// Pace the simulation against the wall clock.
    #[arg(long)]
    real_time: bool,

    /// Abort when the simulation falls behind the wall clock.
    #[arg(long)]
    real_time_strict: bool,

    /// Virtual seconds per wall second in real-time mode.
    #[arg(long, default_value_t = 1.0)]
    real_time_factor: f64,

    /// Name prefix for the results directory.
    #[arg(long, default_value = "Default_")]
    network_name: String,

    /// Directory the results directory is created under.
    #[arg(long, default_value = "./Results")]
    results_root: PathBuf,
}

fn parse_epoch(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Ok(datetime.with_timezone(&Utc));
    }
    // also accept the bare "2020-10-22T20:58:17.862886Z" / no-suffix forms
    let trimmed = text.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("'{}' is not an ISO-8601 datetime: {}", text, e))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    astrons_metrics::describe_metrics();

    let cli = Cli::parse();

    let epoch = match cli.epoch.as_deref().map(parse_epoch) {
        None => Utc::now(),
        Some(Ok(epoch)) => epoch,
        Some(Err(reason)) => {
            eprintln!("error: {}", reason);
            return ExitCode::FAILURE;
        }
    };

    let real_time = if cli.real_time {
        let mut config = RealTimeConfig::with_factor(cli.real_time_factor);
        config.strict = cli.real_time_strict;
        Some(config)
    } else {
        None
    };

    let options = RunOptions {
        model_file: cli.model_file,
        seed: cli.seed,
        end_simtime: cli.end_simtime,
        epoch,
        terminal: cli.terminal,
        node_stats: cli.node_stats || cli.node_stats_history,
        node_stats_history: cli.node_stats_history,
        final_node_states: cli.final_node_states,
        real_time,
        network_name: cli.network_name,
        results_root: cli.results_root,
        install_ctrlc: true,
    };

    match run(&options) {
        Ok(report) => {
            println!(
                "Done. seed={} events={} messages={} results={}",
                report.seed,
                report.stats.events_processed,
                report.messages_seen,
                report.results_dir.display()
            );
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("error: {}", error);
            ExitCode::FAILURE
        }
    }
}
