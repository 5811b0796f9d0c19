mod events;
mod inbound;
mod outbox;
mod schema;
mod tasks;
mod types;
mod users;

pub use inbound::{NewInbound, RETENTION_MARKER};
pub use outbox::{backoff_ms, NewOutbox, SendFailureDisposition};
pub use tasks::{ClaimedTask, NewTask};
pub use users::normalize_address;
pub use types::{
    ActionType, EventType, InboundRecord, InboundStatus, OutboxRecord, OutboxStatus, Preferences,
    TaskEventRecord, TaskRecord, TaskStatus, Tone, UserRecord,
};

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use tracing::error;

use schema::PIPELINE_SCHEMA;

/// Custom error handler that logs the actual connection error
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("postgres connection pool error: {:?}", err);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("store config error: {0}")]
    Config(String),
    #[error("unexpected row data: {0}")]
    Data(String),
}

type PgPool = Pool<PostgresConnectionManager<MakeTlsConnector>>;
type PgConnection = PooledConnection<PostgresConnectionManager<MakeTlsConnector>>;

/// The shared relational store. Every entity the pipeline owns lives here;
/// components mutate rows only through the operations on this type.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(db_url: &str) -> Result<Self, StoreError> {
        let config: postgres::Config = db_url
            .parse()
            .map_err(|err: postgres::Error| StoreError::Config(err.to_string()))?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if allow_invalid_certs() {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|err| StoreError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(8)
            .min_idle(Some(1))
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;

        let store = Self { pool };
        store.ensure_schema()?;
        Ok(store)
    }

    pub(crate) fn connection(&self) -> Result<PgConnection, StoreError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.batch_execute(PIPELINE_SCHEMA)?;
        Ok(())
    }
}

fn allow_invalid_certs() -> bool {
    std::env::var("DATABASE_TLS_ALLOW_INVALID_CERTS")
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
