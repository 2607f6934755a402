//! Edge Relay Agent CLI
//!
//! Runs a forwarding agent that bridges Kafka topics between an edge
//! cluster and a central cluster, with at-least-once delivery in both
//! directions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use edge_relay_core::config::{AgentConfig, LoggingConfig};
use edge_relay_core::endpoint::{ClusterEndpoint, Role};
use edge_relay_core::forward::Forwarder;
use edge_relay_core::topics::{Direction, TopicSet};
use edge_relay_core::{heartbeat, provision};

/// Edge-to-core Kafka relay agent.
#[derive(Parser)]
#[command(name = "edge-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, default_value = "agent.yaml", global = true)]
    config: String,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    loglevel: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the agent in the foreground.
    Start,
    /// Stop a running agent using its PID file.
    Stop {
        /// Skip checking that the recorded PID belongs to this binary.
        #[arg(long)]
        disable_check: bool,
    },
    /// Stop any running agent, then start a new one.
    Restart {
        /// Skip checking that the recorded PID belongs to this binary.
        #[arg(long)]
        disable_check: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Start => start(&args),
        Command::Stop { disable_check } => stop(disable_check),
        Command::Restart { disable_check } => {
            // A restart of an agent that was not running is still a start.
            if let Err(e) = stop(disable_check) {
                eprintln!("stop: {e:#}");
            }
            start(&args)
        }
    }
}

fn start(args: &Args) -> anyhow::Result<()> {
    let config = AgentConfig::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;

    // CLI flag beats the configured level
    let log_config = match &args.loglevel {
        Some(level) => LoggingConfig {
            level: level.clone(),
            ..config.logging.clone()
        },
        None => config.logging.clone(),
    };

    setup_tracing(&log_config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        id = %config.id,
        source = %config.source.bootstrap_servers,
        destination = %config.destination.bootstrap_servers,
        "starting edge relay agent"
    );

    let pid_path = write_pid_file()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(run_agent(config));

    if let Err(e) = std::fs::remove_file(&pid_path) {
        tracing::warn!(path = %pid_path.display(), error = %e, "unable to remove PID file");
    }
    result
}

fn setup_tracing(config: &LoggingConfig) {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer()).init();
    }
}

async fn run_agent(config: AgentConfig) -> anyhow::Result<()> {
    let topics = TopicSet::from_config(&config)?;
    for topic in topics.topics() {
        info!(relation = %topic, "forwarding");
    }

    // Connect both clusters before any forwarding starts
    let source = Arc::new(ClusterEndpoint::connect(Role::Source, &config, &topics)?);
    let destination = Arc::new(ClusterEndpoint::connect(Role::Destination, &config, &topics)?);
    source.ping();
    destination.ping();

    provision::ensure_topics(source.as_ref(), &topics.source_names(), config.create_topics).await?;
    provision::ensure_topics(
        destination.as_ref(),
        &topics.destination_names(),
        config.create_topics,
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    if topics.has_direction(Direction::Push) {
        let forwarder = Forwarder::new(
            Direction::Push,
            &topics,
            &config,
            Arc::clone(&source),
            Arc::clone(&destination),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(forwarder.run()));
    }

    if topics.has_direction(Direction::Pull) {
        let forwarder = Forwarder::new(
            Direction::Pull,
            &topics,
            &config,
            Arc::clone(&destination),
            Arc::clone(&source),
            shutdown_rx.clone(),
        );
        tasks.push(tokio::spawn(forwarder.run()));
    }

    if let Some(heartbeat_config) = config.heartbeat.clone() {
        tasks.push(tokio::spawn(heartbeat::run(
            heartbeat_config,
            config.id.clone(),
            Arc::clone(&destination),
            config.create_topics,
            shutdown_rx.clone(),
        )));
    }

    shutdown_signal().await;
    info!("shutdown signal received, stopping agent");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        let _ = task.await;
    }

    info!("agent shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl+c");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

/// The PID file lives next to the executable, e.g. `edge-relay.pid`.
fn pid_file() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_exe()
        .context("resolving executable path")?
        .with_extension("pid"))
}

fn write_pid_file() -> anyhow::Result<PathBuf> {
    let path = pid_file()?;
    std::fs::write(&path, std::process::id().to_string())
        .with_context(|| format!("writing PID file {}", path.display()))?;
    Ok(path)
}

fn stop(disable_check: bool) -> anyhow::Result<()> {
    let path = pid_file()?;
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no agent PID file at {}", path.display()))?;
    let pid: i32 = raw.trim().parse().context("malformed PID file")?;

    if !disable_check {
        verify_process_name(pid)?;
    }

    kill(Pid::from_raw(pid), Signal::SIGINT)
        .with_context(|| format!("signalling process {pid}"))?;
    std::fs::remove_file(&path)
        .with_context(|| format!("removing PID file {}", path.display()))?;
    println!("stopped agent (pid {pid})");
    Ok(())
}

/// Refuse to signal a PID that has been recycled by an unrelated process.
fn verify_process_name(pid: i32) -> anyhow::Result<()> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))
        .with_context(|| format!("no running process with pid {pid}"))?;
    let name = status
        .lines()
        .find_map(|line| line.strip_prefix("Name:"))
        .map(str::trim)
        .unwrap_or_default();

    let exe = std::env::current_exe().context("resolving executable path")?;
    let expected = exe
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // The kernel truncates the process name to 15 bytes.
    if name.is_empty() || !expected.starts_with(name) {
        anyhow::bail!(
            "pid {pid} belongs to '{name}', not '{expected}'; use --disable-check to override"
        );
    }
    Ok(())
}
