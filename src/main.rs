use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use sensehat_link::config::LinkConfig;
use sensehat_link::controller::ControllerHandle;
use sensehat_link::node::NodeTree;
use sensehat_link::sampling::{seed_values, SamplingScheduler, SimulatedSensors};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DEFAULT_LOG_LEVEL: &str = "info";
const INPUT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Publish Sense HAT joystick state and sensor readings
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Config file, defaults to the user config directory
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the input device name to look for
    #[arg(long)]
    device_name: Option<String>,

    /// Subscribe to a node path at startup (repeatable)
    #[arg(short, long = "subscribe", value_name = "PATH")]
    subscribe: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    install_error_hooks()?;

    let config_path = cli
        .config
        .clone()
        .or_else(LinkConfig::default_path)
        .ok_or_else(|| eyre!("No config directory available, pass --config"))?;
    let loaded = LinkConfig::load(&config_path).await;
    let default_level = loaded
        .as_ref()
        .map(|config| config.log_level.as_str())
        .unwrap_or(DEFAULT_LOG_LEVEL);
    setup_logging_env(default_level);

    let mut config = loaded?;
    if config_path.exists() {
        info!("Using config {}", config_path.display());
    } else {
        info!("No config at {}, using defaults", config_path.display());
    }
    debug!("Config: {:?}", config);
    if let Some(name) = cli.device_name {
        config.device.name = name;
    }

    let tree = Arc::new(NodeTree::with_default_nodes(config.fast_interval_secs()));
    for path in config.nodes.subscribed.iter().chain(cli.subscribe.iter()) {
        match tree.subscribe(path) {
            Ok(count) => info!("Subscribed to {} ({} subscribers)", path, count),
            Err(e) => warn!("Cannot subscribe: {}", e),
        }
    }

    let sensors = Arc::new(SimulatedSensors::new());
    seed_values(tree.as_ref(), sensors.as_ref());

    let stop = CancellationToken::new();

    let input = ControllerHandle::spawn(
        Some(config.controller_settings()),
        tree.clone(),
        stop.clone(),
    )
    .map_err(|e| eyre!("Failed to spawn input pipeline: {}", e))?;

    let scheduler =
        SamplingScheduler::spawn(config.scheduler_settings(), tree.clone(), sensors, stop.clone());

    let mut updates = tree.updates();
    let update_stop = stop.clone();
    let update_log = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = update_stop.cancelled() => break,
                update = updates.recv() => match update {
                    Ok(update) => debug!("{} = {}", update.path, update.value),
                    Err(RecvError::Lagged(skipped)) => warn!("Update log skipped {} updates", skipped),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    stop.cancel();

    scheduler.join().await;
    if let Err(e) = update_log.await {
        warn!("Update log task failed: {}", e);
    }
    tokio::task::spawn_blocking(move || input.shutdown(INPUT_SHUTDOWN_GRACE)).await?;

    info!("Stopped");
    Ok(())
}

fn install_error_hooks() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging_env(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
