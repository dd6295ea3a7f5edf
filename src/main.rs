//! edgerelay daemon entry point
//!
//! Wires the persistent store, the MQTT binding, the data service, the
//! reconnect monitor and the optional schedule strategy together, then runs
//! until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use edgerelay::config::RelayConfig;
use edgerelay::connection::{
    ConnectionManager, ConnectionMonitor, LogStatusService, LogWatchdog, MonitorConfig,
};
use edgerelay::logging::init_default_logging;
use edgerelay::schedule::{ScheduleConfig, ScheduleStrategy, SystemClock};
use edgerelay::service::{DataService, PublishOptions};
use edgerelay::store::{MessageStoreProvider, SledStoreProvider};
use edgerelay::transport::mqtt::{MqttConnection, MqttSettings};

/// Store-and-forward reliability layer for MQTT edge gateways
#[derive(Parser)]
#[command(name = "edgerelay")]
#[command(about = "Store-and-forward reliability layer for MQTT edge gateways")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay daemon
    Run,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("starting edgerelay v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("command failed: {e}");
        process::exit(1);
    }

    info!("shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("loading configuration from {}", path.display());
            Ok(RelayConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["edgerelay.toml", "config/edgerelay.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("loading configuration from {}", path.display());
                    return Ok(RelayConfig::load_from_file(&path)?);
                }
            }
            Err("no configuration file found; provide one with -c/--config or create edgerelay.toml".into())
        }
    }
}

async fn run_relay(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let provider = SledStoreProvider::open(&config.store.path)?;
    let store = provider.open_message_store(&config.store.name, config.store.capacity)?;

    let mqtt = Arc::new(MqttConnection::new(MqttSettings {
        broker_url: config.connection.broker_url.clone(),
        client_id: config.connection.client_id.clone(),
        username_env: config.connection.username_env.clone(),
        password_env: config.connection.password_env.clone(),
        keep_alive: Duration::from_secs(config.connection.keep_alive_secs),
        clean_start: config.connection.clean_start,
    }));

    let service = Arc::new(DataService::new(
        "edgerelay",
        store,
        mqtt.clone(),
        Arc::new(LogStatusService),
        PublishOptions {
            max_payload_size: config.publish.max_payload_size,
            max_in_flight: config.publish.max_in_flight,
            republish_on_new_session: config.publish.republish_on_new_session,
            priority_override_threshold: config
                .schedule
                .priority_override_enable
                .then_some(config.schedule.priority_override_threshold),
        },
    ));
    mqtt.set_listener(service.clone()).await;

    // With a schedule in charge, the monitor starts inactive and waits for
    // the first window to open.
    let monitor = ConnectionMonitor::new(
        mqtt.clone(),
        Arc::new(LogWatchdog),
        service.clone(),
        MonitorConfig {
            component: "edgerelay".to_string(),
            auto_connect_on_startup: config.connection.auto_connect_on_startup
                && !config.schedule.enabled,
            retry_interval: config.retry_interval(),
            recovery_max_failures: config.connection.recovery_max_failures,
        },
    );
    let (monitor_handle, monitor_join) = monitor.spawn();
    service
        .set_task_control(Arc::new(monitor_handle.clone()))
        .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let schedule_join = if config.schedule.enabled {
        // Validation guarantees the expression is present and parses.
        let expression = config.schedule.expression.clone().unwrap_or_default();
        let schedule = edgerelay::schedule::parse_expression(&expression)?;
        let strategy = ScheduleStrategy::new(
            mqtt.clone(),
            Arc::new(monitor_handle.clone()),
            Arc::new(SystemClock),
            ScheduleConfig {
                schedule,
                inactivity_interval: Duration::from_secs(config.schedule.inactivity_interval_secs),
                disconnect_quiesce: Duration::from_secs(config.schedule.disconnect_quiesce_secs),
            },
        );
        let (schedule_handle, join) = strategy.spawn(shutdown_rx.clone());
        service.set_schedule_handle(schedule_handle).await;
        Some(join)
    } else {
        None
    };

    let drain_join = service.clone().spawn_drain_worker(shutdown_rx.clone());
    let housekeeper_join = service.spawn_housekeeper(
        config.housekeeper_interval(),
        config.purge_age(),
        config.store.capacity,
        shutdown_rx,
    );

    info!(
        broker = %config.connection.broker_url,
        store = %config.store.name,
        scheduled = config.schedule.enabled,
        "edgerelay running"
    );

    wait_for_shutdown_signal().await?;

    info!("shutdown initiated");
    let _ = shutdown_tx.send(true);
    monitor_handle.shutdown().await;
    mqtt.disconnect(Duration::from_secs(
        config.schedule.disconnect_quiesce_secs,
    ))
    .await;
    service.shutdown().await;

    drain_join.await?;
    housekeeper_join.await?;
    if let Some(join) = schedule_join {
        join.await?;
    }
    monitor_join.await?;
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
    Ok(())
}

fn handle_config_command(
    config: RelayConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(&config)?);
    }
    info!("configuration is valid");
    Ok(())
}
