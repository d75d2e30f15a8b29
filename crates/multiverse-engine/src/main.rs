//! Engine binary for the Multiverse coordination engine.
//!
//! Wires the event store, orchestrator, realm drivers and inbox relay
//! together and runs the orchestration loop until its tick limit is hit or
//! the process receives Ctrl-C.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `multiverse-config.yaml` (or the path given
//!    as the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Open the event store
//! 4. Register every configured realm with the orchestrator
//! 5. Spawn one tick driver per realm, plus the inbox relay
//! 6. Run the orchestration loop
//! 7. Stop and join every task, then log the result

mod callback;
mod error;
mod realm_handler;
mod relay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use futures::future::join_all;
use multiverse_core::config::{LogFormat, LoggingConfig, MultiverseConfig};
use multiverse_core::control::LoopControl;
use multiverse_core::governance::{ActorAllowList, AllowAll, PermissionCheck};
use multiverse_core::orchestrator::{Orchestrator, SharedOrchestrator};
use multiverse_core::runner;
use multiverse_core::tick::{DriverResult, TickDriver, TickError};
use multiverse_events::EventStore;
use multiverse_types::SYSTEM_ACTOR;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::callback::SummaryLogger;
use crate::error::EngineError;
use crate::realm_handler::WanderingRealm;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "multiverse-config.yaml";

/// Log a progress line every this many control-ticks.
const REPORT_EVERY: u64 = 10;

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the run itself fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        data_dir = %config.store.data_dir.display(),
        realms = config.realms.len(),
        control_tick_interval_ms = config.orchestrator.control_tick_interval_ms,
        max_control_ticks = config.orchestrator.max_control_ticks,
        "multiverse-engine starting"
    );

    // 3. Open the event store.
    let store = Arc::new(
        EventStore::open(&config.store.data_dir)
            .await
            .context("opening event store")?,
    );

    // 4. Register realms.
    let orchestrator = build_orchestrator(&config).context("registering realms")?;

    // 5. Spawn drivers and the relay.
    let control = Arc::new(LoopControl::new(config.orchestrator.control_tick_interval_ms));
    let drivers = spawn_drivers(&config, &store, &control).context("starting realm drivers")?;
    let relay = tokio::spawn(relay::run_relay(
        Arc::clone(&orchestrator),
        Arc::clone(&store),
        Arc::clone(&control),
        control.tick_interval(),
    ));
    spawn_ctrl_c_handler(Arc::clone(&control));

    // 6. Run the orchestration loop.
    let mut callback = SummaryLogger::new(REPORT_EVERY);
    let result = runner::run_orchestration_loop(
        &orchestrator,
        &control,
        config.orchestrator.max_ticks(),
        &mut callback,
    )
    .await
    .map_err(EngineError::from);

    // 7. Stop everything, then report.
    control.request_stop();
    let driver_failures = join_drivers(drivers).await;
    let relay_result = relay.await.map_err(|source| EngineError::Join {
        task: "inbox relay".to_owned(),
        source,
    });

    let result = result?;
    runner::log_loop_end(&result);
    let stats = relay_result??;
    let metadata = orchestrator.read().await.metadata();
    info!(
        end_reason = %result.end_reason,
        total_control_ticks = metadata.total_control_ticks,
        total_games_registered = metadata.total_games_registered,
        total_cross_game_events = metadata.total_cross_game_events,
        relayed = stats.relayed,
        delivered = callback.events_delivered(),
        driver_failures,
        "multiverse-engine shutdown complete"
    );
    Ok(())
}

/// Load configuration from `path`, falling back to defaults (with
/// environment overrides) when the file does not exist.
fn load_config(path: &Path) -> Result<MultiverseConfig, EngineError> {
    if path.exists() {
        Ok(MultiverseConfig::from_file(path)?)
    } else {
        let mut config = MultiverseConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}

/// Initialize the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Create the orchestrator and register every configured realm.
fn build_orchestrator(config: &MultiverseConfig) -> Result<SharedOrchestrator, EngineError> {
    let allowed = &config.orchestrator.allowed_actors;
    let permissions: Arc<dyn PermissionCheck> = if allowed.is_empty() {
        Arc::new(AllowAll)
    } else {
        // The engine itself always needs to register realms and publish
        // pulses.
        Arc::new(ActorAllowList::new(
            allowed.iter().map(String::as_str).chain([SYSTEM_ACTOR]),
        ))
    };

    let mut orchestrator = Orchestrator::with_permission_check(permissions);
    for realm in &config.realms {
        orchestrator.register_game(SYSTEM_ACTOR, realm.registration_request())?;
    }
    Ok(orchestrator.into_shared())
}

type DriverHandle = JoinHandle<Result<DriverResult, TickError>>;

/// Spawn one driver per configured realm.
fn spawn_drivers(
    config: &MultiverseConfig,
    store: &Arc<EventStore>,
    control: &Arc<LoopControl>,
) -> Result<Vec<(String, DriverHandle)>, EngineError> {
    let mut drivers = Vec::with_capacity(config.realms.len());
    for realm in &config.realms {
        let mut driver = TickDriver::new(
            realm.realm_id.clone(),
            realm.tick_interval(),
            Arc::clone(store),
            WanderingRealm::from_os_rng(),
        )?;
        if let Some(every) = realm.snapshot_cadence() {
            driver = driver.with_snapshot_every(every);
        }
        info!(
            realm_id = %realm.realm_id,
            tick_interval_ms = realm.tick_interval_ms,
            snapshot_every = realm.snapshot_every,
            "Realm driver spawned"
        );
        drivers.push((
            realm.realm_id.to_string(),
            driver.spawn(Arc::clone(control), None),
        ));
    }
    Ok(drivers)
}

/// Wait for every driver. A failed driver never affects its siblings, so
/// failures are logged and counted rather than propagated.
async fn join_drivers(drivers: Vec<(String, DriverHandle)>) -> usize {
    let (names, handles): (Vec<String>, Vec<DriverHandle>) = drivers.into_iter().unzip();
    let mut failures: usize = 0;
    for (realm_id, outcome) in names.iter().zip(join_all(handles).await) {
        match outcome {
            Ok(Ok(result)) => info!(
                realm_id,
                end_reason = %result.end_reason,
                total_ticks = result.total_ticks,
                last_tick = result.last_report.as_ref().map(|report| report.tick),
                "Realm driver finished"
            ),
            Ok(Err(err)) => {
                failures = failures.saturating_add(1);
                error!(realm_id, error = %err, kind = ?err.kind(), "Realm driver failed");
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                error!(realm_id, error = %err, "Realm driver task did not complete");
            }
        }
    }
    failures
}

/// Request a stop on the first Ctrl-C.
fn spawn_ctrl_c_handler(control: Arc<LoopControl>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping");
                control.request_stop();
            }
            Err(err) => warn!(error = %err, "Cannot listen for Ctrl-C"),
        }
    });
}
