//! Ingress process: terminates provider webhooks, deduplicates inbound
//! events, and hands them to the ingest queue.

#[path = "inbound_gateway/handlers.rs"]
mod handlers;
#[path = "inbound_gateway/state.rs"]
mod state;
#[path = "inbound_gateway/verify.rs"]
mod verify;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use followup_module::{BoxError, JobQueue, PipelineConfig, Store};

use state::GatewayState;

const INBOUND_BODY_MAX_BYTES: usize = 2 * 1024 * 1024;

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

    if config.email_webhook_secret.is_none() {
        info!("EMAIL_WEBHOOK_SECRET not set; email signature verification disabled");
    }
    if config.chat_app_secret.is_none() {
        info!("CHAT_APP_SECRET not set; chat signature verification disabled");
    }

    let state = Arc::new(GatewayState {
        store,
        queue,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/webhook/email", post(handlers::ingest_email))
        .route(
            "/webhook/chat",
            get(handlers::verify_chat_webhook).post(handlers::ingest_chat),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(INBOUND_BODY_MAX_BYTES));

    let host: IpAddr = config
        .ingress_host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.ingress_host))?;
    let addr = SocketAddr::new(host, config.ingress_port);
    info!("inbound gateway listening on {}", addr);

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
