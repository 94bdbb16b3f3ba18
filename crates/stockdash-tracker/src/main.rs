/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Task states as JSON lines on stdout, logs on stderr or a file
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, subcommands, or shutdown handling
*/

mod cli;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use stockdash_adapter::AnalysisRequest;
use stockdash_tracker::{TaskId, TaskSubscription, TaskTracker, TrackerConfig};

#[derive(Parser, Debug)]
#[command(name = "stockdash-tracker", version, about = "Follow stock analysis tasks on the dashboard backend")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", global = true)]
    config_path: Option<PathBuf>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info", global = true)]
    log_level: String,
    /// Write logs to this file instead of stderr
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit an analysis job
    Submit {
        stock_code: String,
        #[arg(long, default_value = "1y")]
        period: String,
        #[arg(long = "agent", value_name = "NAME")]
        agents: Vec<String>,
        /// Keep printing states until the task finishes
        #[arg(long)]
        follow: bool,
    },
    /// Print every state transition of a task until it finishes
    Watch { task_id: String },
    /// List active tasks
    Active {
        #[arg(long)]
        follow: bool,
    },
    /// Cancel a task
    Cancel { task_id: String },
    /// Write the default configuration file
    InitConfig {
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let _log_guard = init_tracing(&args.log_level, args.log_file.as_deref())?;

    let command = match args.command {
        Command::InitConfig { output, force } => {
            let path = cli::init::run_init(output, force)?;
            println!("{}", path.display());
            return Ok(());
        }
        command => command,
    };

    let config = load_config(args.config_path.as_deref())?;
    info!(base_url = %config.api.base_url, streaming = config.streaming.enabled, "configuration loaded");

    let tracker = TaskTracker::from_config(config).context("build task tracker")?;
    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    let outcome = run_command(&tracker, command, &shutdown).await;

    tracker
        .shutdown_and_wait()
        .await
        .context("shutdown observers")?;
    info!("observers shutdown complete");
    outcome
}

async fn run_command(tracker: &TaskTracker, command: Command, shutdown: &CancellationToken) -> Result<()> {
    match command {
        Command::Submit {
            stock_code,
            period,
            agents,
            follow,
        } => {
            let mut request = AnalysisRequest::new(stock_code).with_period(period);
            if !agents.is_empty() {
                request = request.with_agents(agents);
            }
            let task_id = tracker.submit(&request).await.context("submit analysis")?;
            if follow {
                let subscription = tracker.observe(task_id).await?;
                follow_subscription(subscription, shutdown).await
            } else {
                print_json(&serde_json::json!({ "task_id": task_id }))
            }
        }
        Command::Watch { task_id } => {
            let subscription = tracker.observe(task_id).await?;
            follow_subscription(subscription, shutdown).await
        }
        Command::Active { follow } => {
            let states = tracker.list_active().await.context("list active tasks")?;
            for state in &states {
                print_json(state)?;
            }
            if !follow {
                return Ok(());
            }

            let (tx, mut rx) = mpsc::channel(64);
            for state in states.into_iter().filter(|state| !state.is_terminal()) {
                let mut subscription = tracker.observe(state.id).await?;
                // Already printed above.
                let _ = subscription.next().await;
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(state) = subscription.next().await {
                        if tx.send(state).await.is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    state = rx.recv() => match state {
                        Some(state) => print_json(&state)?,
                        None => return Ok(()),
                    },
                }
            }
        }
        Command::Cancel { task_id } => {
            let task_id = TaskId::from(task_id);
            // Adopt first so an id from another session can be cancelled.
            let _ = tracker.observe(task_id.clone()).await?;
            let outcome = tracker.cancel(&task_id).await?;
            print_json(&outcome)
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

async fn follow_subscription(mut subscription: TaskSubscription, shutdown: &CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                warn!(task_id = %subscription.task_id(), "stopped following before the task finished");
                return Ok(());
            }
            state = subscription.next() => match state {
                Some(state) => print_json(&state)?,
                None => return Ok(()),
            },
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let line = serde_json::to_string(value).context("serialize output")?;
    println!("{line}");
    Ok(())
}

fn init_tracing(log_level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|err| anyhow!(err))
                .context("initialize tracing subscriber")?;
            Ok(None)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackerConfig> {
    let default_path = TrackerConfig::default_path().filter(|path| path.exists());
    let path = path.or(default_path.as_deref());
    TrackerConfig::load(path).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
