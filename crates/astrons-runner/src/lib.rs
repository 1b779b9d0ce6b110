//! The run orchestrator.
//!
//! Takes a model file and run options, builds the simulation through the
//! network factory, runs it to the end time (or a stop), and leaves a
//! results directory behind:
//!
//! - `simulation.log`: human-readable trace
//! - `node_log.txt`: per-message, per-node TSV
//! - `loaded_node_config.txt`, `loaded_network.json`: reproducibility
//! - `msg_history.txt`, `msg_history.csv`: the full message history
//! - `node_stats.txt`, `node_stats_total.txt`, `sim_end_state.txt`: optional

pub mod artifacts;
pub mod stats;

use astrons_engine::{RealTimeConfig, RunStats, SimError, Simulation, SimulationBuilder};
use astrons_model::{load_network_file, ModelError, NodeRegistry};
use astrons_core::SimTime;
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("could not write artifact '{path}': {source}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a run needs to know.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model_file: PathBuf,
    /// Deterministic seed; drawn from OS entropy when absent.
    pub seed: Option<u64>,
    /// Virtual end time in sim seconds.
    pub end_simtime: f64,
    /// Wall datetime mapped to virtual time zero.
    pub epoch: DateTime<Utc>,
    /// Write the trace to stdout instead of `simulation.log`.
    pub terminal: bool,
    pub node_stats: bool,
    /// Implies `node_stats`; adds each node's full message history.
    pub node_stats_history: bool,
    pub final_node_states: bool,
    pub real_time: Option<RealTimeConfig>,
    pub network_name: String,
    pub results_root: PathBuf,
    /// Install a Ctrl-C handler that requests a graceful stop. The binary
    /// sets this; library callers and tests leave it off.
    pub install_ctrlc: bool,
}

impl RunOptions {
    pub fn new(model_file: impl Into<PathBuf>) -> Self {
        RunOptions {
            model_file: model_file.into(),
            seed: None,
            end_simtime: 200.0,
            epoch: Utc::now(),
            terminal: false,
            node_stats: false,
            node_stats_history: false,
            final_node_states: false,
            real_time: None,
            network_name: "Default_".to_string(),
            results_root: PathBuf::from("./Results"),
            install_ctrlc: false,
        }
    }
}

/// What a completed (or aborted) run reports back.
#[derive(Debug)]
pub struct RunReport {
    pub results_dir: PathBuf,
    pub seed: u64,
    pub stats: RunStats,
    pub messages_seen: usize,
}

/// The results directory name: network name plus the epoch, filesystem-safe.
fn results_dir_name(options: &RunOptions) -> String {
    let stamp = options
        .epoch
        .naive_utc()
        .format("%Y-%m-%dT%H:%M:%S.%6f")
        .to_string()
        .replace(':', "-")
        .replace('.', "_");
    format!("{}{}", options.network_name, stamp)
}

fn artifact_writer(dir: &Path, name: &str) -> Result<BufWriter<File>, RunnerError> {
    let path = dir.join(name);
    File::create(&path)
        .map(BufWriter::new)
        .map_err(|source| RunnerError::Artifact {
            path: path.display().to_string(),
            source,
        })
}

/// Run a model to completion and emit all artifacts.
///
/// A fatal simulation error still writes the artifacts accumulated so far
/// before the error is returned.
pub fn run(options: &RunOptions) -> Result<RunReport, RunnerError> {
    let seed = options.seed.unwrap_or_else(rand::random);
    let session = uuid::Uuid::new_v4();

    let results_dir = options.results_root.join(results_dir_name(options));
    std::fs::create_dir_all(&results_dir).map_err(|source| RunnerError::Artifact {
        path: results_dir.display().to_string(),
        source,
    })?;

    // Trace destination: the artifact file, or stdout in terminal mode.
    let trace_writer: Box<dyn Write + Send> = if options.terminal {
        Box::new(std::io::stdout())
    } else {
        let mut w = artifact_writer(&results_dir, "simulation.log")?;
        let _ = writeln!(w, "Session token: {}", session);
        let _ = writeln!(w, "Using random seed: {}", seed);
        Box::new(w)
    };
    let node_log_writer = artifact_writer(&results_dir, "node_log.txt")?;

    let mut builder: SimulationBuilder = Simulation::builder(seed)
        .epoch(options.epoch)
        .end_time(SimTime::from_secs(options.end_simtime))
        .trace_writer(trace_writer)
        .node_log_writer(Box::new(node_log_writer));

    let registry = NodeRegistry::builtin();
    let loaded = load_network_file(&options.model_file, &registry, &mut builder)?;
    tracing::info!(
        nodes = loaded.node_count,
        seed,
        model = %options.model_file.display(),
        "network loaded"
    );

    let mut sim = builder.build();
    if let Some(real_time) = options.real_time.clone() {
        sim.set_real_time(real_time);
    }
    if options.install_ctrlc {
        let stop = sim.stop_handle();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, std::sync::atomic::Ordering::SeqCst);
        });
    }

    {
        let mut w = artifact_writer(&results_dir, "loaded_node_config.txt")?;
        artifacts::write_loaded_config(&sim, &mut w).map_err(|source| RunnerError::Artifact {
            path: "loaded_node_config.txt".to_string(),
            source,
        })?;
    }

    let run_result = sim.run_until(SimTime::from_secs(options.end_simtime));
    sim.finish();
    postprocess(&sim, &loaded.documents, options, &results_dir)?;

    let stats = run_result?;
    tracing::info!(
        events = stats.events_processed,
        final_time = stats.final_time.as_secs_f64(),
        "run complete"
    );
    Ok(RunReport {
        results_dir,
        seed,
        stats,
        messages_seen: sim.history().len(),
    })
}

fn postprocess(
    sim: &Simulation,
    documents: &[serde_json::Value],
    options: &RunOptions,
    results_dir: &Path,
) -> Result<(), RunnerError> {
    let artifact = |name: &str, source: std::io::Error| RunnerError::Artifact {
        path: name.to_string(),
        source,
    };

    let mut w = artifact_writer(results_dir, "loaded_network.json")?;
    artifacts::write_loaded_network(documents, &mut w)
        .map_err(|e| artifact("loaded_network.json", e))?;

    let mut w = artifact_writer(results_dir, "msg_history.txt")?;
    artifacts::write_msg_history(sim.history(), &mut w)
        .map_err(|e| artifact("msg_history.txt", e))?;

    let mut w = artifact_writer(results_dir, "msg_history.csv")?;
    artifacts::write_msg_history_csv(sim.history(), &mut w)
        .map_err(|e| artifact("msg_history.csv", e))?;

    if options.node_stats || options.node_stats_history {
        let mut w = artifact_writer(results_dir, "node_stats.txt")?;
        artifacts::write_node_stats(sim, &mut w, options.node_stats_history)
            .map_err(|e| artifact("node_stats.txt", e))?;

        let mut w = artifact_writer(results_dir, "node_stats_total.txt")?;
        artifacts::write_node_stats_total(sim, &mut w)
            .map_err(|e| artifact("node_stats_total.txt", e))?;
    }

    if options.final_node_states {
        let mut w = artifact_writer(results_dir, "sim_end_state.txt")?;
        artifacts::write_sim_end_state(sim, &options.network_name, &mut w)
            .map_err(|e| artifact("sim_end_state.txt", e))?;
    }
    Ok(())
}
