//! Main application run loop

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::app::options::AppOptions;
use crate::artifacts::ArtifactStore;
use crate::credentials::CredentialSet;
use crate::errors::DeployerError;
use crate::fleet::{self, FleetContext};
use crate::inventory;
use crate::metrics::DeploymentGauge;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::settings::Settings;
use crate::shutdown::{spawn_signal_listener, ShutdownState};
use crate::vault;

/// Run one fleet deployment.
///
/// Resolves credentials and the device list, starts the signal listener and
/// the metrics server, deploys on every device and prints the report. Errors
/// returned from here are startup errors; per-device failures only show up in
/// the report and the gauge.
pub async fn run(settings: &Settings, options: &AppOptions) -> Result<(), DeployerError> {
    if options.dry_run {
        warn!("Dry-run mode enabled");
    }

    let credentials = resolve_credentials(settings).await?;
    let devices = resolve_devices(settings).await?;

    let shutdown = Arc::new(ShutdownState::new());
    let signal_listener = spawn_signal_listener(Arc::clone(&shutdown));

    let gauge = Arc::new(DeploymentGauge::new());
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let server_state = Arc::new(ServerState::new(Arc::clone(&gauge)));
    let server_handle = serve(&options.server, server_state, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    let result = deploy_fleet(settings, options, credentials, &devices, gauge, shutdown).await;

    // The server outlives the fleet run so the last gauge values stay
    // scrapeable until right before exit.
    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server error: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }
    signal_listener.abort();

    result
}

async fn deploy_fleet(
    settings: &Settings,
    options: &AppOptions,
    credentials: CredentialSet,
    devices: &[String],
    gauge: Arc<DeploymentGauge>,
    shutdown: Arc<ShutdownState>,
) -> Result<(), DeployerError> {
    let artifacts = Arc::new(ArtifactStore::prepare(settings).await?);

    let context = FleetContext {
        credentials,
        artifacts,
        gauge,
        shutdown,
        connect: options.connect.clone(),
        force: options.force,
        dry_run: options.dry_run,
    };
    let report = fleet::run_fleet(devices, options.dry_run, move |hostname| {
        fleet::deploy_one(hostname, context.clone())
    })
    .await;
    report.log();
    Ok(())
}

/// Pick the credential source: static settings first, Vault otherwise
async fn resolve_credentials(settings: &Settings) -> Result<CredentialSet, DeployerError> {
    if settings.has_static_credentials() {
        let (Some(username), Some(password)) = (&settings.username, &settings.password) else {
            return Err(DeployerError::ConfigError(
                "static credentials are incomplete".to_string(),
            ));
        };
        return Ok(CredentialSet::from_static(username, password));
    }
    vault::fetch_credentials(settings).await
}

/// Resolve the device list: static settings first, inventory service otherwise
async fn resolve_devices(settings: &Settings) -> Result<Vec<String>, DeployerError> {
    if !settings.devices.is_empty() {
        return Ok(settings.devices.clone());
    }
    let Some(url) = settings.inventory.url.as_deref() else {
        return Err(DeployerError::InventoryError(
            "no device source configured, set devices or inventory.url".to_string(),
        ));
    };
    inventory::fetch_devices(
        url,
        &settings.inventory.filter,
        Duration::from_secs(settings.http_timeout_secs),
    )
    .await
}
