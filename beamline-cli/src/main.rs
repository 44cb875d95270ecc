//! Beamline CLI - submit a simulation job to the local pool and follow it.
//!
//! Reads the simulator input files from a directory, fans the job out over
//! N local worker tasks, prints per-task progress while the simulation
//! runs, and writes the merged estimators as JSON when it completes.

mod error;

use beamline::dispatch::{ProcessRunner, ScriptedRunner, SubmitRequest};
use beamline::logging::{default_log_dir, default_log_file, init_logging};
use beamline::runtime::{JobStatusView, Orchestrator};
use beamline::state::{JobState, Platform, SimulatorKind};
use clap::{Parser, ValueEnum};
use error::CliError;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, ValueEnum)]
enum SimType {
    /// SHIELD-HIT12A (binary must be on PATH)
    Shieldhit,
    /// TOPAS (binary must be on PATH)
    Topas,
    /// FLUKA (rfluka must be on PATH)
    Fluka,
    /// Built-in dummy simulator (no binary required)
    Dummy,
}

impl SimType {
    fn kind(&self) -> SimulatorKind {
        match self {
            Self::Shieldhit => SimulatorKind::ShieldHit,
            Self::Topas => SimulatorKind::Topas,
            Self::Fluka => SimulatorKind::Fluka,
            Self::Dummy => SimulatorKind::Dummy,
        }
    }
}

#[derive(Parser)]
#[command(name = "beamline")]
#[command(about = "Run a fanned-out simulation job on the local worker pool", long_about = None)]
#[command(version = beamline::VERSION)]
struct Args {
    /// Directory containing the simulator input files
    #[arg(long)]
    input: PathBuf,

    /// Number of parallel worker tasks
    #[arg(long, default_value = "4")]
    ntasks: u32,

    /// Simulator to run
    #[arg(long, value_enum, default_value = "shieldhit")]
    sim_type: SimType,

    /// Job title shown in status output
    #[arg(long, default_value = "beamline job")]
    title: String,

    /// Where to write the merged estimators JSON (stdout if omitted)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Primaries per task for the dummy simulator
    #[arg(long, default_value = "1000")]
    dummy_primaries: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let guard = match init_logging(default_log_dir(), default_log_file()) {
        Ok(guard) => guard,
        Err(e) => CliError::LoggingInit(e.to_string()).exit(),
    };

    let input_files = match read_input_files(&args.input) {
        Ok(files) => files,
        Err(e) => e.exit(),
    };

    let orchestrator = match args.sim_type {
        SimType::Dummy => Orchestrator::builder()
            .runner(Arc::new(ScriptedRunner::new(args.dummy_primaries)))
            .start(),
        _ => Orchestrator::builder()
            .runner(Arc::new(ProcessRunner::new()))
            .start(),
    };

    let request = SubmitRequest {
        title: args.title.clone(),
        input_files,
        ntasks: args.ntasks,
        sim_type: args.sim_type.kind(),
        platform: Platform::Local,
    };

    let handle = match orchestrator.submit(request).await {
        Ok(handle) => handle,
        Err(e) => CliError::Submit(e).exit(),
    };
    let job_id = handle.id().clone();

    println!("Submitted job {} ({} tasks)", job_id, args.ntasks);

    // Follow the job, printing progress until it reaches a terminal state.
    let final_state = loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        let Ok(status) = orchestrator.job_status(&job_id) else {
            continue;
        };
        print_progress(&status);
        if status.job_state.is_terminal() {
            break status.job_state;
        }
    };

    println!("Job {} finished: {}", job_id, final_state);

    let exit_code = match final_state {
        JobState::Completed => {
            match orchestrator.job_results(&job_id) {
                Ok(estimators) => {
                    if let Err(e) = write_results(args.output.as_deref(), &estimators) {
                        e.exit();
                    }
                    0
                }
                Err(e) => {
                    eprintln!("Results unavailable: {}", e);
                    1
                }
            }
        }
        _ => 1,
    };

    orchestrator.shutdown().await;
    drop(guard);
    process::exit(exit_code);
}

/// Reads every regular file in the input directory into memory.
fn read_input_files(dir: &std::path::Path) -> Result<HashMap<String, Vec<u8>>, CliError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CliError::Input {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut files = HashMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let content = std::fs::read(&path).map_err(|e| CliError::Input {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            files.insert(name, content);
        }
    }

    if files.is_empty() {
        return Err(CliError::Input {
            path: dir.display().to_string(),
            reason: "no input files found".to_string(),
        });
    }
    Ok(files)
}

fn print_progress(status: &JobStatusView) {
    let lines: Vec<String> = status
        .tasks
        .iter()
        .map(|task| {
            let percent = if task.requested_primaries > 0 {
                task.simulated_primaries * 100 / task.requested_primaries
            } else {
                0
            };
            format!("task {} {} {}%", task.task_id, task.state, percent)
        })
        .collect();
    println!("[{}] {}", status.job_state, lines.join(" | "));
}

fn write_results(
    output: Option<&std::path::Path>,
    estimators: &[beamline::merge::Estimator],
) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(estimators).unwrap_or_else(|_| "[]".to_string());
    match output {
        Some(path) => std::fs::write(path, json).map_err(|error| CliError::FileWrite {
            path: path.display().to_string(),
            error,
        }),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}
