use std::env;
use std::time::Duration;

use crate::BoxError;

/// Runtime configuration shared by every pipeline process.
///
/// Loaded once per process from the environment (a `.env` file is honored in
/// development). Unset keys fall back to documented defaults; only
/// `DATABASE_URL` is required.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,

    pub ingress_host: String,
    pub ingress_port: u16,
    pub admin_host: String,
    pub admin_port: u16,
    pub service_host: String,
    pub service_port: u16,

    pub outbox_max_attempts: i32,
    pub outbox_poll_interval: Duration,
    pub outbox_claim_limit: i64,
    pub scheduler_cron: String,
    pub scheduler_claim_limit: i64,
    pub ingest_worker_concurrency: usize,
    pub execute_worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub retention_days: i64,

    pub email_webhook_secret: Option<String>,
    pub chat_app_secret: Option<String>,
    pub chat_verify_token: Option<String>,

    pub extractor_api_base_url: String,
    pub extractor_key: Option<String>,
    pub drafter_api_base_url: String,

    pub send_email_api_base_url: String,
    pub send_email_token: Option<String>,
    pub send_email_from: String,
    pub send_chat_api_base_url: String,
    pub send_chat_access_token: Option<String>,
    pub send_chat_phone_number_id: String,

    pub external_call_timeout: Duration,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let database_url = env_non_empty("DATABASE_URL")
            .ok_or_else(|| -> BoxError { "DATABASE_URL is required".into() })?;

        let scheduler_cron = normalize_cron_expression(
            &env_non_empty("SCHEDULER_CRON").unwrap_or_else(|| "* * * * *".to_string()),
        )?;

        Ok(Self {
            database_url,
            ingress_host: env_non_empty("INGRESS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            ingress_port: env_parse("INGRESS_PORT", 8080),
            admin_host: env_non_empty("ADMIN_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            admin_port: env_parse("ADMIN_PORT", 8081),
            service_host: env_non_empty("SERVICE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            service_port: env_parse("SERVICE_PORT", 9100),
            outbox_max_attempts: env_parse_positive("OUTBOX_MAX_ATTEMPTS", 5),
            outbox_poll_interval: Duration::from_millis(env_parse_positive::<u64>(
                "OUTBOX_POLL_INTERVAL_MS",
                5000,
            )),
            outbox_claim_limit: env_parse_positive("OUTBOX_CLAIM_LIMIT", 20),
            scheduler_cron,
            scheduler_claim_limit: env_parse_positive("SCHEDULER_CLAIM_LIMIT", 100),
            ingest_worker_concurrency: env_parse_positive("INGEST_WORKER_CONCURRENCY", 5),
            execute_worker_concurrency: env_parse_positive("EXECUTE_WORKER_CONCURRENCY", 5),
            worker_poll_interval: Duration::from_millis(env_parse_positive::<u64>(
                "WORKER_POLL_INTERVAL_MS",
                1000,
            )),
            retention_days: env_parse_positive("RETENTION_DAYS", 60),
            email_webhook_secret: env_non_empty("EMAIL_WEBHOOK_SECRET"),
            chat_app_secret: env_non_empty("CHAT_APP_SECRET"),
            chat_verify_token: env_non_empty("CHAT_VERIFY_TOKEN"),
            extractor_api_base_url: env_non_empty("EXTRACTOR_API_BASE_URL")
                .unwrap_or_else(|| "https://api.extractor.invalid".to_string()),
            extractor_key: env_non_empty("EXTRACTOR_KEY"),
            drafter_api_base_url: env_non_empty("DRAFTER_API_BASE_URL")
                .or_else(|| env_non_empty("EXTRACTOR_API_BASE_URL"))
                .unwrap_or_else(|| "https://api.extractor.invalid".to_string()),
            send_email_api_base_url: env_non_empty("SEND_EMAIL_API_BASE_URL")
                .unwrap_or_else(|| "https://api.postmarkapp.com".to_string()),
            send_email_token: env_non_empty("SEND_EMAIL_TOKEN"),
            send_email_from: env_non_empty("SEND_EMAIL_FROM")
                .unwrap_or_else(|| "assistant@followup.invalid".to_string()),
            send_chat_api_base_url: env_non_empty("SEND_CHAT_API_BASE_URL")
                .unwrap_or_else(|| "https://graph.facebook.com/v17.0".to_string()),
            send_chat_access_token: env_non_empty("SEND_CHAT_ACCESS_TOKEN"),
            send_chat_phone_number_id: env_non_empty("SEND_CHAT_PHONE_NUMBER_ID")
                .unwrap_or_default(),
            external_call_timeout: Duration::from_secs(env_parse_positive::<u64>(
                "EXTERNAL_CALL_TIMEOUT_SECS",
                30,
            )),
        })
    }
}

/// Accepts the conventional 5-field cron form and normalizes it to the
/// 6-field (seconds-first) form the `cron` crate parses.
pub fn normalize_cron_expression(expression: &str) -> Result<String, BoxError> {
    let trimmed = expression.trim();
    let fields = trimmed.split_whitespace().count();
    let normalized = match fields {
        5 => format!("0 {trimmed}"),
        6 => trimmed.to_string(),
        other => {
            return Err(format!(
                "invalid cron expression (expected 5 or 6 fields, got {other}): {trimmed}"
            )
            .into())
        }
    };
    normalized
        .parse::<cron::Schedule>()
        .map_err(|err| -> BoxError { format!("invalid cron expression: {err}").into() })?;
    Ok(normalized)
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default_value: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default_value)
}

fn env_parse_positive<T>(key: &str, default_value: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self { key, previous }
        }

        fn unset(key: &'static str) -> Self {
            let previous = env::var(key).ok();
            env::remove_var(key);
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(value) => env::set_var(self.key, value),
                None => env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn five_field_cron_gains_a_seconds_field() {
        assert_eq!(normalize_cron_expression("* * * * *").unwrap(), "0 * * * * *");
        assert_eq!(
            normalize_cron_expression("0 */2 * * * *").unwrap(),
            "0 */2 * * * *"
        );
        assert!(normalize_cron_expression("* * *").is_err());
    }

    #[test]
    fn from_env_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _db = EnvGuard::set("DATABASE_URL", "postgres://localhost/followup");
        let _poll = EnvGuard::unset("OUTBOX_POLL_INTERVAL_MS");
        let _attempts = EnvGuard::unset("OUTBOX_MAX_ATTEMPTS");
        let _cron = EnvGuard::unset("SCHEDULER_CRON");

        let config = PipelineConfig::from_env().expect("config");
        assert_eq!(config.outbox_max_attempts, 5);
        assert_eq!(config.outbox_poll_interval, Duration::from_millis(5000));
        assert_eq!(config.scheduler_cron, "0 * * * * *");
        assert_eq!(config.retention_days, 60);
    }

    #[test]
    fn from_env_requires_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _db = EnvGuard::unset("DATABASE_URL");
        assert!(PipelineConfig::from_env().is_err());
    }

    #[test]
    fn invalid_numeric_values_fall_back() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _db = EnvGuard::set("DATABASE_URL", "postgres://localhost/followup");
        let _bad = EnvGuard::set("OUTBOX_MAX_ATTEMPTS", "-3");

        let config = PipelineConfig::from_env().expect("config");
        assert_eq!(config.outbox_max_attempts, 5);
    }
}
