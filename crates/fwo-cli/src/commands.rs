use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use fwo_config::{Config, StorageBackend};
use fwo_inventory::{ImageLoader, InventoryClient, NoopImageLoader};
use fwo_planner::Planner;
use fwo_scheduler::Scheduler;
use fwo_snapshot::SnapshotEngine;
use fwo_store::{EtcdStore, MemoryStore, StateStore};
use fwo_transport::{spawn_ca_poller, RedfishTransport};
use fwo_workers::WorkerContext;

const CA_POLL_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve(bind: String, port: u16) -> Result<()> {
    let config = Config::from_env().context("failed to load configuration from environment")?;

    let store: Arc<dyn StateStore> = match &config.storage {
        StorageBackend::Memory => {
            tracing::info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
        StorageBackend::Etcd { host, port } => {
            tracing::info!(host = %host, port = %port, "using etcd store");
            Arc::new(EtcdStore::new(host, *port))
        }
    };

    let transport = Arc::new(
        RedfishTransport::new_insecure().context("failed to build Redfish transport")?,
    );

    if let Some(ca_uri) = config.ca.ca_uri.clone() {
        tracing::info!(ca_uri = %ca_uri, "starting CA poller");
        spawn_ca_poller(transport.clone(), ca_uri, CA_POLL_INTERVAL);
    } else {
        tracing::warn!("no CA URI configured, readiness will never report ready");
    }

    let inventory = Arc::new(InventoryClient::new(
        config.sms_server.clone(),
        transport.clone(),
        config.vault.enabled,
    ));

    if let Some(wait) = config.load_nexus_wait {
        let store_for_loader = store.clone();
        let loader: Arc<dyn ImageLoader> = Arc::new(NoopImageLoader);
        tokio::spawn(async move {
            tracing::info!(?wait, "LOAD_NEXUS_WAIT_MIN set, waiting before importing firmware images");
            tokio::time::sleep(wait).await;
            match loader.load_images().await {
                Ok(images) => {
                    tracing::info!(count = images.len(), "image loader returned images");
                    for image in images {
                        if let Err(err) = store_for_loader.put_image(&image).await {
                            tracing::error!(error = %err, image_id = %image.id, "failed to persist loaded image");
                        }
                    }
                }
                Err(err) => tracing::error!(error = %err, "image loader failed"),
            }
        });
    }

    let planner = Arc::new(Planner::new(store.clone(), inventory.clone(), config.node_blacklist.clone()));
    let snapshots = Arc::new(SnapshotEngine::new(store.clone(), inventory.clone(), config.node_blacklist.clone()));

    let s3_endpoint = std::env::var("S3_ENDPOINT").ok();
    let worker_ctx = WorkerContext::new(store.clone(), inventory.clone(), s3_endpoint);
    let scheduler = Arc::new(Scheduler::new(store.clone(), worker_ctx, Some(config.days_to_keep_actions)));
    tokio::spawn(scheduler.clone().run());

    let app = fwo_api::build_app(store, inventory, transport, planner, snapshots);

    let addr = format!("{bind}:{port}");
    tracing::info!(addr = %addr, "starting fwo server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
