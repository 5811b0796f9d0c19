//! Admin process: read and retry surface over failed tasks and outbox rows,
//! plus the retention sweep.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tracing::info;

use followup_module::admin::{admin_router, AdminState};
use followup_module::{BoxError, JobQueue, PipelineConfig, Store};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(PipelineConfig::from_env()?);
    let (store, queue) = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> Result<_, BoxError> {
            let store = Arc::new(Store::new(&config.database_url)?);
            let queue = Arc::new(JobQueue::from_config(&config)?);
            Ok((store, queue))
        })
        .await??
    };

    let app = admin_router(AdminState {
        store,
        queue,
        config: config.clone(),
    });

    let host: IpAddr = config
        .admin_host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.admin_host))?;
    let addr = SocketAddr::new(host, config.admin_port);
    info!("admin API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
