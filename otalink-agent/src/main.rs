//! # otalink agent
//!
//! Over-the-air update daemon. Checks the release service for new software,
//! downloads and applies it with the device's update mechanism (A/B update
//! engine or recovery), and reboots into it when the device allows.
//!
//! ## Usage
//! ```bash
//! otalink-agent --config /etc/otalink/agent.yaml
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use otalink_agent::cli::Args;
use otalink_agent::config::{AgentConfig, Mechanism, DEFAULT_CONFIG_PATH};
use otalink_agent::platform::{
    device, AndroidRecovery, BatteryMonitor, DeviceSignals, HttpDownloader, HttpReleaseChecker,
    SoftwareVersion, SystemReboot, SystemSignals, SystemVersion, UpdateEngineClient,
};
use otalink_agent::update::{
    AbUpdateActionHandler, AutoInstaller, BootCompletion, FileCachedOtaProvider, FileStateStore,
    PeriodicCheck, RecoveryUpdateActionHandler, ReleaseCheck, TaskScheduler, UpdateActionHandler,
    Updater,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    otalink_common::init_logging_with_format(args.log_format, &args.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting otalink agent");

    // Load configuration
    let config = match &args.config {
        Some(config_path) => match AgentConfig::load(config_path) {
            Ok(cfg) => {
                info!(config_path = %config_path, "Configuration loaded");
                cfg.with_cli_overrides(&args)
            }
            Err(e) => {
                error!(error = %e, path = %config_path, "Failed to load configuration");
                return Err(e);
            }
        },
        None => match AgentConfig::load(DEFAULT_CONFIG_PATH) {
            Ok(cfg) => {
                info!(
                    config_path = %DEFAULT_CONFIG_PATH,
                    "Configuration loaded from default location"
                );
                cfg.with_cli_overrides(&args)
            }
            Err(_) => {
                info!("No config file found, using CLI arguments and defaults");
                AgentConfig::default().with_cli_overrides(&args)
            }
        },
    };
    config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;
    let policy = config
        .install_policy()
        .map_err(|e| anyhow::anyhow!("Invalid policy: {}", e))?;

    info!(
        mechanism = ?config.mechanism,
        server = %config.server.url,
        default_auto_install = policy.default_auto_install,
        "Agent configured"
    );

    // Device collaborators
    let version: Arc<dyn SoftwareVersion> = Arc::new(SystemVersion::new(
        config.device.version_property.clone(),
        config.device.version_files.clone(),
    ));
    let battery = Arc::new(BatteryMonitor::new(
        config.device.power_supply_dir.clone(),
        config.paths.battery_state_file.clone(),
    ));
    let signals: Arc<dyn DeviceSignals> = Arc::new(SystemSignals::new(
        battery.clone(),
        config.device.build_time_property.clone(),
        config.device.setup_complete_fallback,
    ));

    let serial = device::device_serial(config.server.device_serial.as_deref()).await;
    let checker = HttpReleaseChecker::new(&config.server, serial.clone(), version.clone())
        .context("Failed to create release service client")?;
    let scheduler = TaskScheduler::new(
        policy.clone(),
        signals.clone(),
        config.schedule.download_delay_duration(),
        config.schedule.install_retry_duration(),
    );
    let check = ReleaseCheck::new(
        Arc::new(checker),
        Arc::new(FileCachedOtaProvider::new(config.paths.ota_cache_file.clone())),
        Arc::new(scheduler),
        policy.clone(),
    );

    // Update strategy for this device
    let (handler, leftover_package) = match config.mechanism {
        Mechanism::Ab => {
            let handler: Arc<dyn UpdateActionHandler> = Arc::new(AbUpdateActionHandler::new(
                Arc::new(UpdateEngineClient::new(config.device.update_engine_client.clone())),
                Arc::new(SystemReboot::new(config.device.reboot_command.clone())),
                version.clone(),
                check,
            ));
            (handler, None)
        }
        Mechanism::Recovery => {
            let downloader = HttpDownloader::new(config.paths.download_file.clone())
                .context("Failed to create package downloader")?;
            let handler: Arc<dyn UpdateActionHandler> = Arc::new(RecoveryUpdateActionHandler::new(
                Arc::new(AndroidRecovery::new(
                    config.paths.recovery_command_file.clone(),
                    config.device.recovery_reboot_command.clone(),
                )),
                Arc::new(downloader),
                version.clone(),
                check,
            ));
            (handler, Some(config.paths.download_file.clone()))
        }
    };

    let store = Arc::new(FileStateStore::new(config.paths.state_file.clone()));
    let updater = Updater::new(handler, store);
    info!(serial = %serial, state = %updater.state(), "Updater ready");

    // Background services
    tokio::spawn(battery.run(config.schedule.battery_poll_duration()));
    tokio::spawn(log_events(updater.clone()));
    tokio::spawn(
        AutoInstaller::new(
            updater.clone(),
            policy,
            signals.clone(),
            config.schedule.install_retry_duration(),
        )
        .run(),
    );

    let boot = BootCompletion::new(updater.clone(), version, signals, leftover_package);
    if let Some(outcome) = boot.run().await {
        info!(outcome = ?outcome, "Reported installation outcome");
    }

    let every = config.schedule.check_interval_duration();
    tokio::spawn(PeriodicCheck::new(updater.clone(), every).run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!(state = %updater.state(), "Shutting down otalink agent");

    Ok(())
}

/// Log every update event; the notification layer is not part of the agent.
async fn log_events(updater: Updater) {
    let mut events = updater.events();
    loop {
        match events.recv().await {
            Ok(event) => info!(event = ?event, state = %updater.state(), "Update event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}
