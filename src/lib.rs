use rocket::{Ignite, Rocket};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{error, info};

mod api;
pub mod artifact;
pub mod assinafy;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod lease;
pub mod poller;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::config::{Config, setup_tracing};

use crate::artifact::ArtifactStore;
use crate::assinafy::AssinafyClient;
use crate::coordinator::SignatureCoordinator;
use crate::poller::ReconcilePoller;

/// Runs the service: the webhook/health HTTP server and the background
/// signature-reconciliation poller, until ctrl-c or either task exits.
pub async fn launch(config: Config) -> anyhow::Result<()> {
    let pool = config.get_sqlite_pool().await?;
    sqlx::migrate!().run(&pool).await?;

    let client = Arc::new(AssinafyClient::new(&config.assinafy)?);
    let artifacts = ArtifactStore::new(config.storage_root.clone());
    let coordinator = Arc::new(SignatureCoordinator::new(
        Arc::clone(&client),
        pool.clone(),
        artifacts,
        config.readiness,
    ));

    let server_task = spawn_server_task(&config, Arc::clone(&coordinator));
    let poller_task = spawn_poller_task(&config, pool, coordinator);

    await_shutdown(server_task, poller_task).await;

    info!("Shutdown complete");
    Ok(())
}

fn spawn_server_task(
    config: &Config,
    coordinator: Arc<SignatureCoordinator>,
) -> JoinHandle<Result<Rocket<Ignite>, rocket::Error>> {
    let rocket_config = rocket::Config::figment()
        .merge(("port", config.server_port))
        .merge(("address", "0.0.0.0"));

    let rocket = rocket::custom(rocket_config)
        .mount("/", api::routes())
        .manage(config.clone())
        .manage(coordinator);

    tokio::spawn(rocket.launch())
}

fn spawn_poller_task(
    config: &Config,
    pool: SqlitePool,
    coordinator: Arc<SignatureCoordinator>,
) -> JoinHandle<()> {
    let poller = ReconcilePoller::new(config.reconcile, coordinator, pool);
    tokio::spawn(poller.run())
}

async fn await_shutdown(
    server_task: JoinHandle<Result<Rocket<Ignite>, rocket::Error>>,
    poller_task: JoinHandle<()>,
) {
    let server_abort = server_task.abort_handle();
    let poller_abort = poller_task.abort_handle();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, shutting down gracefully...");
            abort_task("server", &server_abort);
            abort_task("poller", &poller_abort);
        }
        result = server_task => {
            log_server_result(result);
            abort_task("poller", &poller_abort);
        }
        result = poller_task => {
            log_poller_result(result);
            abort_task("server", &server_abort);
        }
    }
}

fn abort_task(name: &str, handle: &AbortHandle) {
    info!("Aborting {name} task");
    handle.abort();
}

fn log_server_result(result: Result<Result<Rocket<Ignite>, rocket::Error>, JoinError>) {
    match result {
        Ok(Ok(_)) => info!("Server completed successfully"),
        Ok(Err(e)) => error!("Server failed: {e}"),
        Err(e) => error!("Server task panicked: {e}"),
    }
}

fn log_poller_result(result: Result<(), JoinError>) {
    match result {
        Ok(()) => info!("Poller task completed"),
        Err(e) => error!("Poller task panicked: {e}"),
    }
}
