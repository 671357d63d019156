use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, Command};
use scope_daemon::config;
use scope_daemon::error_log::ErrorLog;
use scope_daemon::instance_lock::InstanceLock;
use scope_daemon::persistence::PersistenceManager;
use scope_daemon::supervisor::ScopeSupervisor;
use scope_types::{AcquisitionEvent, SystemConfig};
use scopes::bindings::ScopeBindings;
use scopes::discover::discover_all;
use scopes::mock::MockScopeBindings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOCK_FILE: &str = "scope_daemon.lock";
const ERROR_LOG_FILE: &str = "errors.txt";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scope_daemon=debug,scopes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ScopeVNS daemon starting...");

    // --- Argument Parsing ---
    let matches = Command::new("scope_daemon")
        .about("Nerve stimulation capture daemon for booth-mounted oscilloscopes")
        .arg(
            Arg::new("config")
                .long("config")
                .default_value("scopevns.config")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("mock")
                .long("mock")
                .action(clap::ArgAction::SetTrue)
                .help("Use simulated oscilloscopes instead of real hardware"),
        )
        .arg(
            Arg::new("mock-units")
                .long("mock-units")
                .value_parser(clap::value_parser!(usize))
                .default_value("1")
                .help("How many simulated units to attach per device family"),
        )
        .get_matches();

    // Refuse to run twice against the same booth files.
    let _lock = InstanceLock::acquire(LOCK_FILE)
        .context("another instance may already be running")?;

    let error_log = ErrorLog::new(ERROR_LOG_FILE);

    // --- Configuration ---
    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());
    let config = match config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("could not load {config_path:?}: {e}; using defaults");
            if let Err(log_err) = error_log.append("configuration", &e.to_string()) {
                tracing::warn!("error log write failed: {log_err}");
            }
            SystemConfig::default()
        }
    };
    if config.base_paths().is_empty() {
        tracing::warn!("no storage paths configured; captures will not be persisted");
    }

    // --- Device Discovery ---
    let use_mock = matches.get_flag("mock");
    let devices = if use_mock {
        tracing::info!("using simulated oscilloscopes");
        let mock_units = *matches.get_one::<usize>("mock-units").unwrap();
        let fire_delay = std::time::Duration::from_millis(500);
        let a_serials = (1..=mock_units).map(|i| format!("MOCK-2204A-{i}")).collect();
        let b_serials = (1..=mock_units).map(|i| format!("MOCK-2206B-{i}")).collect();
        let a_bindings: Arc<dyn ScopeBindings> =
            Arc::new(MockScopeBindings::with_auto_fire(a_serials, fire_delay));
        let b_bindings: Arc<dyn ScopeBindings> =
            Arc::new(MockScopeBindings::with_auto_fire(b_serials, fire_delay));
        discover_all(&a_bindings, &b_bindings)
    } else {
        // Driving real units needs the vendor SDK, which is only present on
        // the lab machines and is linked in by a downstream build.
        anyhow::bail!("hardware bindings are not linked into this build; run with --mock");
    };
    if devices.is_empty() {
        tracing::warn!("no oscilloscopes found");
    }

    // --- Supervisor ---
    let persistence = PersistenceManager::new(config.base_paths(), config.group_id.clone());
    let supervisor = ScopeSupervisor::start(devices, &config, persistence, error_log);

    // Mirror capture traffic into the log so an operator can watch a
    // headless daemon work.
    let mut events = supervisor.subscribe();
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AcquisitionEvent::CaptureReady {
                    serial_code,
                    booth_number,
                    capture,
                    ..
                } => tracing::info!(
                    "capture on {serial_code} (booth {booth_number:?}): {} samples, peak {:.2} V",
                    capture.samples.len(),
                    capture.max_voltage()
                ),
                AcquisitionEvent::DeviceFault {
                    serial_code,
                    operation,
                    message,
                } => tracing::error!("fault on {serial_code} in {operation}: {message}"),
                AcquisitionEvent::SessionStarted {
                    serial_code,
                    rat_name,
                } => tracing::info!("session started on {serial_code} for {rat_name}"),
                AcquisitionEvent::SessionStopped {
                    serial_code,
                    capture_count,
                } => tracing::info!("session on {serial_code} stopped, {capture_count} stims"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    supervisor.shutdown().await;
    event_logger.abort();
    tracing::info!("ScopeVNS daemon stopped");
    Ok(())
}
