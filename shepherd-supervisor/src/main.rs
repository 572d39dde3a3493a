//! `shepherd-supervisor`: run a worker pool against the Redis queue.

use clap::Parser;
use shepherd_queue::{
    FileJobLog, HandlerRegistry, JobLog, MessageQueue, MultiJobLog, TracingJobLog,
};
use shepherd_supervisor::settings::parse_duration_str;
use shepherd_supervisor::{
    Settings, Supervisor, SupervisorError, SupervisorReport, SupervisorResult, logging, signal,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Job queue worker supervisor
#[derive(Parser, Debug)]
#[command(name = "shepherd-supervisor")]
#[command(version)]
#[command(about = "Supervise a pool of job queue workers")]
struct Cli {
    /// Settings file (TOML)
    #[arg(short, long, env = "SHEPHERD_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum concurrent workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// Kill workers silent for longer than this (e.g. 300s, 5m)
    #[arg(long, value_parser = parse_duration_str)]
    worker_timeout: Option<Duration>,

    /// Queues to consume, in preference order
    #[arg(long, value_delimiter = ',')]
    queues: Option<Vec<String>>,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(max_workers) = self.max_workers {
            settings.supervisor.max_workers = max_workers;
        }
        if let Some(timeout) = self.worker_timeout {
            settings.supervisor.worker_timeout = timeout;
        }
        if let Some(queues) = &self.queues {
            settings.supervisor.queues = queues.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("shepherd-supervisor: {err}");
            return ExitCode::from(2);
        }
    };
    cli.apply(&mut settings);
    logging::init(&settings.log);

    match run(settings).await {
        Ok(report) => {
            info!(
                spawned = report.spawned,
                jobs_processed = report.jobs_processed,
                killed = report.killed,
                forced = report.forced_at_shutdown,
                "Shutdown complete"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "Supervisor failed to start");
            ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> SupervisorResult<SupervisorReport> {
    settings.supervisor.validate()?;
    if (settings.redis.pool_size as usize) <= settings.supervisor.max_workers {
        warn!(
            pool_size = settings.redis.pool_size,
            max_workers = settings.supervisor.max_workers,
            "Redis pool is not larger than the worker pool; consumers may wait for connections"
        );
    }

    info!(redis = %settings.redis.redacted_url(), "Connecting to queue store");
    let queue = MessageQueue::redis(settings.redis.clone(), settings.queue.clone()).await?;

    let job_log = job_log(&settings)?;
    let supervisor =
        Supervisor::new(queue, builtin_handlers(), settings.supervisor)?.with_shared_job_log(job_log);

    let shutdown = CancellationToken::new();
    signal::cancel_on_signal(shutdown.clone()).map_err(SupervisorError::Signal)?;

    Ok(supervisor.run(shutdown).await)
}

fn job_log(settings: &Settings) -> SupervisorResult<Arc<dyn JobLog>> {
    match &settings.log.job_log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(shepherd_queue::QueueError::from)?;
            }
            info!(path = %path.display(), "Writing job log file");
            Ok(Arc::new(
                MultiJobLog::new()
                    .with(TracingJobLog)
                    .with(FileJobLog::new(path)),
            ))
        }
        None => Ok(Arc::new(TracingJobLog)),
    }
}

/// Handlers shipped with the binary.
fn builtin_handlers() -> HandlerRegistry {
    HandlerRegistry::builder()
        .handler_fn("noop", |_| async { Ok(serde_json::Value::Null) })
        .handler_fn("echo", |data| async move { Ok(data) })
        .build()
}
