use std::env;
use std::fmt;
use std::str::FromStr;

use postgres_native_tls::MakeTlsConnector;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::config::PipelineConfig;

/// Custom error handler that logs the actual connection error
#[derive(Debug)]
struct LoggingErrorHandler;

impl r2d2::HandleError<postgres::Error> for LoggingErrorHandler {
    fn handle_error(&self, err: postgres::Error) {
        error!("postgres connection pool error: {:?}", err);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error("postgres error: {0}")]
    Postgres(#[from] postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job queue config error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Ingest,
    Execute,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Execute => "execute",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ingest" => Ok(JobKind::Ingest),
            "execute" => Ok(JobKind::Execute),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    Ingest { inbound_id: Uuid, user_id: String },
    Execute { task_id: Uuid },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Ingest { .. } => JobKind::Ingest,
            JobPayload::Execute { .. } => JobKind::Execute,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub inserted: bool,
}

#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub payload: JobPayload,
}

/// At-least-once work queue on the relational store. The client-supplied
/// `dedupe_key` is UNIQUE, so re-enqueueing the same logical job is a no-op;
/// crashed workers are recovered through the `locked_at` lease.
#[derive(Clone)]
pub struct JobQueue {
    pool: Pool<PostgresConnectionManager<MakeTlsConnector>>,
    lease_secs: i64,
    max_attempts: i32,
}

impl JobQueue {
    pub fn from_config(config: &PipelineConfig) -> Result<Self, JobQueueError> {
        let lease_secs = resolve_i64_env("JOB_LEASE_SECS", 60);
        let max_attempts = resolve_i32_env("JOB_MAX_ATTEMPTS", 5);
        Self::new(&config.database_url, lease_secs, max_attempts)
    }

    pub fn new(db_url: &str, lease_secs: i64, max_attempts: i32) -> Result<Self, JobQueueError> {
        let config: postgres::Config = db_url.parse().map_err(JobQueueError::Postgres)?;

        let mut tls_builder = native_tls::TlsConnector::builder();
        if resolve_bool_env("DATABASE_TLS_ALLOW_INVALID_CERTS") {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let tls_connector = tls_builder
            .build()
            .map_err(|err| JobQueueError::Config(err.to_string()))?;
        let tls = MakeTlsConnector::new(tls_connector);

        let manager = PostgresConnectionManager::new(config, tls);
        let pool = Pool::builder()
            .max_size(4)
            .min_idle(Some(1))
            .idle_timeout(Some(std::time::Duration::from_secs(300)))
            .error_handler(Box::new(LoggingErrorHandler))
            .build(manager)?;
        let queue = Self {
            pool,
            lease_secs,
            max_attempts,
        };
        queue.ensure_schema()?;
        Ok(queue)
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<PostgresConnectionManager<MakeTlsConnector>>, JobQueueError> {
        Ok(self.pool.get()?)
    }

    fn ensure_schema(&self) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS jobs (
                job_id UUID PRIMARY KEY,
                kind TEXT NOT NULL,
                dedupe_key TEXT NOT NULL UNIQUE,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                available_at TIMESTAMPTZ,
                locked_at TIMESTAMPTZ,
                locked_by TEXT,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS jobs_claim_idx
                ON jobs(kind, status, created_at);",
        )?;
        Ok(())
    }

    pub fn enqueue(
        &self,
        payload: &JobPayload,
        dedupe_key: &str,
    ) -> Result<EnqueueResult, JobQueueError> {
        let mut conn = self.connection()?;
        let payload_json = serde_json::to_string(payload)?;
        let inserted = conn.execute(
            "INSERT INTO jobs (job_id, kind, dedupe_key, payload_json, status, created_at)
             VALUES ($1, $2, $3, $4, 'pending', now())
             ON CONFLICT (dedupe_key) DO NOTHING",
            &[
                &Uuid::new_v4(),
                &payload.kind().as_str(),
                &dedupe_key,
                &payload_json,
            ],
        )?;
        Ok(EnqueueResult {
            inserted: inserted > 0,
        })
    }

    /// Claim the next runnable job of one kind. Pending jobs and jobs whose
    /// processing lease has expired are both eligible; the skip-locked select
    /// keeps concurrent workers off the same row.
    pub fn claim_next(&self, kind: JobKind) -> Result<Option<QueuedJob>, JobQueueError> {
        let mut conn = self.connection()?;
        let instance_id = resolve_worker_instance_id();
        let lease_secs = self.lease_secs;

        let mut tx = conn.transaction()?;
        let row = tx.query_opt(
            "SELECT job_id, payload_json
             FROM jobs
             WHERE kind = $1
               AND (
                 status = 'pending'
                 OR (status = 'processing' AND locked_at < now() - ($2::bigint * interval '1 second'))
               )
               AND (available_at IS NULL OR available_at <= now())
               AND attempts < $3
             ORDER BY created_at
             LIMIT 1
             FOR UPDATE SKIP LOCKED",
            &[&kind.as_str(), &lease_secs, &self.max_attempts],
        )?;

        let Some(row) = row else {
            tx.commit()?;
            return Ok(None);
        };

        let job_id: Uuid = row.get(0);
        let payload_json: String = row.get(1);

        tx.execute(
            "UPDATE jobs
             SET status = 'processing',
                 locked_at = now(),
                 locked_by = $2,
                 attempts = attempts + 1
             WHERE job_id = $1",
            &[&job_id, &instance_id],
        )?;
        tx.commit()?;

        let payload: JobPayload = serde_json::from_str(&payload_json)?;
        Ok(Some(QueuedJob { job_id, payload }))
    }

    pub fn mark_done(&self, job_id: Uuid) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        conn.execute(
            "UPDATE jobs
             SET status = 'done', locked_at = NULL, locked_by = NULL
             WHERE job_id = $1",
            &[&job_id],
        )?;
        Ok(())
    }

    pub fn mark_failed(&self, job_id: Uuid, error: &str) -> Result<(), JobQueueError> {
        let mut conn = self.connection()?;
        let row = conn.query_one("SELECT attempts FROM jobs WHERE job_id = $1", &[&job_id])?;
        let attempts: i32 = row.get(0);

        if attempts >= self.max_attempts {
            conn.execute(
                "UPDATE jobs
                 SET status = 'failed', locked_at = NULL, locked_by = NULL,
                     available_at = NULL, last_error = $2
                 WHERE job_id = $1",
                &[&job_id, &error],
            )?;
        } else {
            let backoff_secs = i64::from(attempts.max(1)).saturating_mul(5);
            conn.execute(
                "UPDATE jobs
                 SET status = 'pending', locked_at = NULL, locked_by = NULL,
                     available_at = now() + ($2::bigint * interval '1 second'),
                     last_error = $3
                 WHERE job_id = $1",
                &[&job_id, &backoff_secs, &error],
            )?;
        }
        Ok(())
    }
}

fn resolve_worker_instance_id() -> String {
    if let Ok(value) = env::var("WORKER_INSTANCE_ID") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| format!("pid-{}", std::process::id()))
}

fn resolve_i64_env(key: &str, default_value: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_i32_env(key: &str, default_value: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default_value)
}

fn resolve_bool_env(key: &str) -> bool {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase())
        .map(|value| matches!(value.as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
