//! CLI and worker server for automated gating.
//!
//! Provides:
//! - Single-sample gating from the command line
//! - Batch gating through the dispatch queue, locally or against remote workers
//! - WebSocket worker server
//! - Synthetic samples for demos

mod dispatch;
mod io;
mod server;
mod synth;
mod transport;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use gating_core::{run_pipeline, GatingOptions, PipelineOutput};

use dispatch::{DispatchQueue, JobOutcome, Priority};
use server::ServerConfig;
use synth::SynthConfig;
use transport::{LocalTransport, Transport, WsTransport};

#[derive(Parser)]
#[command(name = "gating")]
#[command(about = "Automated gating of two-parameter cytometry plots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gate a single sample
    Gate {
        /// Job file (JSON, optionally .gz)
        #[arg(short, long)]
        job: PathBuf,

        /// Gating options (JSON) replacing the job's own
        #[arg(long)]
        options: Option<PathBuf>,

        /// Output file for results (JSON); stdout if omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Gate many samples through the dispatch queue
    Batch {
        /// Job files, each holding one job or an array of jobs
        #[arg(required = true)]
        jobs: Vec<PathBuf>,

        /// Concurrent pipelines (default: available cores minus two)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Worker server to dispatch to, e.g. ws://host:8080/ws
        #[arg(long)]
        remote: Option<String>,

        /// Directory for per-sample results
        #[arg(short, long, default_value = "gated")]
        output_dir: PathBuf,
    },

    /// Start a WebSocket worker server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,

        /// Concurrent pipelines
        #[arg(short, long, default_value = "1")]
        workers: usize,
    },

    /// Write a synthetic job with Gaussian clusters
    Synth {
        #[arg(short, long, default_value = "2")]
        clusters: usize,

        /// Events per cluster
        #[arg(short, long, default_value = "5000")]
        events: usize,

        /// Cluster standard deviation, in raw units
        #[arg(long, default_value = "30")]
        spread: f64,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Put a share of events on the axes, as a mass cytometer would
        #[arg(long)]
        mass_cytometry: bool,

        #[arg(long)]
        min_peak_size: Option<f64>,

        /// Output file (JSON, optionally .gz)
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn summarize(output: &PipelineOutput) {
    info!("{}: {:?}, {} peaks, {} gates", output.sample_id, output.status, output.peaks.len(), output.gates.len());
    for criterion in &output.criteria {
        warn!("{}: {} ({})", output.sample_id, criterion.message, criterion.information);
    }
}

fn gate(job: &Path, options: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let mut jobs = io::load_jobs(job)?;
    let options: Option<GatingOptions> = options.map(|path| io::load_json(path)).transpose()?;
    let mut outputs = Vec::with_capacity(jobs.len());
    for job in &mut jobs {
        if let Some(options) = &options {
            job.options = options.clone();
        }
        let result = run_pipeline(job).with_context(|| format!("gating {}", job.sample_id))?;
        summarize(&result);
        outputs.push(result);
    }
    let outputs = match outputs.len() {
        1 => serde_json::to_value(&outputs[0])?,
        _ => serde_json::to_value(&outputs)?,
    };
    match output {
        Some(path) => io::write_json(path, &outputs, true),
        None => {
            println!("{}", serde_json::to_string_pretty(&outputs)?);
            Ok(())
        }
    }
}

fn output_path(dir: &Path, sample_id: &str) -> PathBuf {
    dir.join(format!("{}.json", sample_id.replace(['/', '\\'], "_")))
}

async fn batch<T: Transport>(queue: DispatchQueue<T>, paths: &[PathBuf], output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir).with_context(|| format!("creating {}", output_dir.display()))?;
    queue.start();

    let mut handles = vec![];
    for path in paths {
        for job in io::load_jobs(path)? {
            // A job file removed while its jobs wait is treated as a deleted sample
            let source = path.clone();
            handles.push(queue.submit(job, Priority::Default, Arc::new(move || source.exists())));
        }
    }
    info!("submitted {} jobs to {} workers", handles.len(), queue.worker_count());

    let (mut gated, mut failed, mut discarded) = (0, 0, 0);
    for handle in handles {
        let key = handle.key().to_string();
        match handle.outcome().await {
            JobOutcome::Completed(output) => {
                summarize(&output);
                io::write_json(output_path(output_dir, &output.sample_id), &*output, true)?;
                gated += 1;
            }
            JobOutcome::Discarded => {
                info!("{}: discarded", key);
                discarded += 1;
            }
            JobOutcome::Failed(message) => {
                warn!("{}: {}", key, message);
                failed += 1;
            }
        }
    }
    queue.shutdown().await;
    info!("{} gated, {} failed, {} discarded", gated, failed, discarded);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Gate { job, options, output } => {
            tokio::task::spawn_blocking(move || gate(&job, options.as_deref(), output.as_deref())).await?
        }
        Commands::Batch { jobs, workers, remote, output_dir } => {
            let workers = workers.unwrap_or_else(dispatch::default_worker_count);
            match remote {
                Some(url) => batch(DispatchQueue::with_workers(WsTransport::new(url), workers), &jobs, &output_dir).await,
                None => batch(DispatchQueue::with_workers(LocalTransport, workers), &jobs, &output_dir).await,
            }
        }
        Commands::Serve { port, workers } => server::run_server(port, ServerConfig { workers }).await,
        Commands::Synth { clusters, events, spread, seed, mass_cytometry, min_peak_size, output } => {
            let job = synth::synthesize(&SynthConfig {
                sample_id: output
                    .file_name()
                    .and_then(|name| name.to_str())
                    .and_then(|name| name.split('.').next())
                    .unwrap_or("synthetic")
                    .to_string(),
                clusters,
                events_per_cluster: events,
                spread,
                seed,
                mass_cytometry,
                min_peak_size,
            });
            io::write_json(&output, &job, false)?;
            info!("wrote {} events to {}", job.events.len(), output.display());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn output_paths_stay_in_dir() {
        let dir = Path::new("out");
        assert_eq!(output_path(dir, "plate1/A01"), dir.join("plate1_A01.json"));
    }

    #[test(tokio::test)]
    async fn batch_writes_one_file_per_sample() {
        let dir = std::env::temp_dir().join(format!("gating-batch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let jobs: Vec<_> = ["s1", "s2"]
            .iter()
            .map(|id| {
                synth::synthesize(&SynthConfig {
                    sample_id: id.to_string(),
                    events_per_cluster: 2000,
                    min_peak_size: Some(300.),
                    ..SynthConfig::default()
                })
            })
            .collect();
        let input = dir.join("jobs.json");
        io::write_json(&input, &jobs, false).unwrap();

        let output_dir = dir.join("out");
        batch(DispatchQueue::with_workers(LocalTransport, 2), &[input], &output_dir).await.unwrap();
        for id in ["s1", "s2"] {
            let output: PipelineOutput = io::load_json(output_path(&output_dir, id)).unwrap();
            assert!(output.is_success(), "{:?}", output.criteria);
        }
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
