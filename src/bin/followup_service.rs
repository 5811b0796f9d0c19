//! Worker process: ingest workers, scheduler, execute workers, and the
//! outbox sender, with a small health endpoint. Shutdown stops the queue
//! consumers and joins every worker thread before exiting.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::info;

use followup_module::adapters::OutboundRouter;
use followup_module::drafter::Drafter;
use followup_module::executor::spawn_execute_workers;
use followup_module::extractor::Extractor;
use followup_module::ingest::spawn_ingest_workers;
use followup_module::outbox_sender::spawn_outbox_sender;
use followup_module::scheduler::spawn_scheduler;
use followup_module::{BoxError, JobQueue, PipelineConfig, Store};

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(PipelineConfig::from_env()?);

    // Store, queue, and HTTP clients are synchronous; build them off the
    // runtime threads.
    let (store, queue, extractor, drafter, router) = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || -> Result<_, BoxError> {
            let store = Arc::new(Store::new(&config.database_url)?);
            let queue = Arc::new(JobQueue::from_config(&config)?);
            let extractor = Arc::new(Extractor::from_config(&config)?);
            let drafter = Arc::new(Drafter::from_config(&config)?);
            let router = Arc::new(OutboundRouter::from_config(&config)?);
            Ok((store, queue, extractor, drafter, router))
        })
        .await??
    };

    let mut ingest_control =
        spawn_ingest_workers(config.clone(), store.clone(), queue.clone(), extractor);
    let mut scheduler_control = spawn_scheduler(config.clone(), store.clone(), queue.clone());
    let mut execute_control =
        spawn_execute_workers(config.clone(), store.clone(), queue.clone(), drafter);
    let mut sender_control = spawn_outbox_sender(config.clone(), store.clone(), router);

    let app = Router::new().route("/health", get(health));
    let host: IpAddr = config
        .service_host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.service_host))?;
    let addr = SocketAddr::new(host, config.service_port);
    info!("followup service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("draining workers");
    ingest_control.stop_and_join();
    scheduler_control.stop_and_join();
    execute_control.stop_and_join();
    sender_control.stop_and_join();
    serve_result?;
    info!("followup service stopped");
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
