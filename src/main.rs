#![forbid(unsafe_code)]

//! `agent-pty`: drive an agent CLI session from the command line.
//!
//! Loads the TOML configuration, then either probes the agent binary
//! (`check`) or runs one task to completion inside a PTY (`run`), printing
//! classified output as JSON lines on stdout.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_pty_runtime::config::Config;
use agent_pty_runtime::events::SessionEvent;
use agent_pty_runtime::models::spawn::SpawnOptions;
use agent_pty_runtime::runtime::Runtime;
use agent_pty_runtime::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-pty", about = "Run agent CLI sessions under a PTY", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe the configured agent binary and print the result.
    Check,
    /// Run one task and wait for it to complete.
    Run {
        /// Task text written to the agent.
        #[arg(long, default_value = "")]
        task: String,
        /// Resume a previous agent conversation.
        #[arg(long, conflicts_with = "continue_last")]
        resume: Option<String>,
        /// Continue the most recent agent conversation.
        #[arg(long = "continue")]
        continue_last: bool,
        /// Seconds to wait for completion.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = Config::load_from_path(&args.config)?;
    info!(agent_id = config.agent.id, "configuration loaded");
    let runtime = Runtime::from_config(config)?;

    let outcome = match args.command {
        Command::Check => {
            let availability = runtime.check_availability().await;
            print_json(&availability);
            if availability.available {
                Ok(())
            } else {
                Err(AppError::Process(availability.error.unwrap_or_default()))
            }
        }
        Command::Run {
            task,
            resume,
            continue_last,
            timeout_secs,
        } => {
            let options = SpawnOptions {
                task,
                resume_session_id: resume,
                continue_last,
                ..SpawnOptions::default()
            };
            run_task(&runtime, options, Duration::from_secs(timeout_secs)).await
        }
    };

    runtime.shutdown().await;
    outcome
}

async fn run_task(runtime: &Runtime, options: SpawnOptions, timeout: Duration) -> Result<()> {
    let mut events = runtime.subscribe();
    let printer_cancel = CancellationToken::new();
    let printer = {
        let cancel = printer_cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    recv = events.recv() => match recv {
                        Ok(event @ (SessionEvent::ParsedOutput { .. }
                            | SessionEvent::Stopped { .. }
                            | SessionEvent::Error { .. })) => print_json(&event),
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    };

    let session = runtime.start_session(options).await?;
    let wait_cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = wait_cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let outcome = runtime
        .wait_for_completion_with_cancel(&session.id, timeout, wait_cancel)
        .await;
    ctrl_c.abort();

    if let Err(err) = runtime.stop_session(&session.id, false).await {
        error!(%err, session_id = session.id, "failed to stop session");
    }
    printer_cancel.cancel();
    if let Err(err) = printer.await {
        warn!(%err, "event printer task failed");
    }

    outcome.map(|output| {
        info!(session_id = session.id, "task completed");
        print_json(&output);
    })
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => error!(%err, "failed to serialize output"),
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries JSON results; logs go to stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
