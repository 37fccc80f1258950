use std::sync::Arc;

use anyhow::Context;
use neb_core::{
    admin::Admin,
    config::{load_bootstrap, Config},
    dispatch::Dispatcher,
    guard::ServiceConfigGuard,
    locks::lock_pool,
    registry::ClientRegistry,
    store::{JsonFileStore, Store},
};
use neb_matrix::MatrixClientFactory;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    neb_core::logging::init("neb")?;

    let cfg = Config::load()?;
    info!(
        database = %cfg.database_path.display(),
        sync_retry_ms = cfg.sync_retry.as_millis() as u64,
        lock_stripes = cfg.lock_stripes,
        "starting neb"
    );

    let store: Arc<dyn Store> = Arc::new(
        JsonFileStore::open(cfg.database_path.clone())
            .await
            .with_context(|| format!("opening {}", cfg.database_path.display()))?,
    );
    let factory = Arc::new(MatrixClientFactory::new(cfg.http_timeout, cfg.sync_timeout)?);
    let catalog = Arc::new(neb_services::catalog());
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), catalog.clone()));
    let registry = Arc::new(ClientRegistry::new(
        store.clone(),
        factory,
        dispatcher.clone(),
        cfg.sync_retry,
    ));
    let admin = Admin::new(
        store,
        registry.clone(),
        catalog.clone(),
        ServiceConfigGuard::new(lock_pool(cfg.lock_stripes)),
    );

    let started = registry.start_all().await?;
    info!(clients = started, service_types = ?catalog.types(), "stored identities restored");

    if let Some(path) = cfg.config_file.as_deref() {
        let boot = load_bootstrap(path)?;
        info!(
            path = %path.display(),
            clients = boot.clients.len(),
            services = boot.services.len(),
            "applying bootstrap file"
        );
        for client in boot.clients {
            let user_id = client.user_id.clone();
            if let Err(e) = admin.configure_client(client).await {
                error!(user_id = %user_id, error = %e, "bootstrap client rejected");
            }
        }
        for service in boot.services {
            let service_id = service.id.clone();
            if let Err(e) = admin.configure_service(service).await {
                error!(service_id = %service_id, error = %e, "bootstrap service rejected");
            }
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    warn!("shutdown requested");

    admin.shutdown().await;
    let stats = dispatcher.stats();
    info!(
        commands_ok = stats.commands_ok,
        commands_failed = stats.commands_failed,
        expansions = stats.expansions,
        deliveries_failed = stats.deliveries_failed,
        "neb stopped"
    );
    Ok(())
}
