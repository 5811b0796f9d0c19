#![allow(dead_code)]

use uuid::Uuid;

pub fn require_database_url(test_name: &str) -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("DATABASE_URL") {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            eprintln!("Skipping {test_name}; DATABASE_URL not set.");
            None
        }
    }
}

pub fn start_mockito_server(test_name: &str) -> Option<mockito::ServerGuard> {
    let server = std::panic::catch_unwind(mockito::Server::new);
    match server {
        Ok(server) => Some(server),
        Err(_) => {
            eprintln!("Skipping {test_name}; unable to start mockito server in this environment.");
            None
        }
    }
}

/// A throwaway Postgres schema for one test run. The connection URL pins the
/// search path to the schema so every table the pipeline creates lands in
/// it; drop cleans up.
pub struct TestSchema {
    base_url: String,
    pub schema: String,
    pub url: String,
}

impl TestSchema {
    pub fn create(base_url: &str) -> Self {
        let schema = format!("followup_test_{}", Uuid::new_v4().simple());
        let mut client = raw_client(base_url);
        client
            .batch_execute(&format!("CREATE SCHEMA \"{schema}\""))
            .expect("create test schema");
        let url = schema_scoped_url(base_url, &schema);
        Self {
            base_url: base_url.to_string(),
            schema,
            url,
        }
    }

    /// Direct SQL access scoped to the test schema, for seeding and
    /// assertions the store API does not expose.
    pub fn client(&self) -> postgres::Client {
        raw_client(&self.url)
    }
}

impl Drop for TestSchema {
    fn drop(&mut self) {
        if let Ok(mut client) = postgres::Client::connect(&self.base_url, postgres::NoTls) {
            let _ = client.batch_execute(&format!(
                "DROP SCHEMA IF EXISTS \"{}\" CASCADE",
                self.schema
            ));
        }
    }
}

fn raw_client(url: &str) -> postgres::Client {
    postgres::Client::connect(url, postgres::NoTls).expect("postgres connection")
}

fn schema_scoped_url(base_url: &str, schema: &str) -> String {
    let separator = if base_url.contains('?') { '&' } else { '?' };
    format!("{base_url}{separator}options=-c%20search_path%3D{schema}")
}
