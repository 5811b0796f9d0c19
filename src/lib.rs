pub mod adapters;
pub mod admin;
pub mod channel;
pub mod config;
pub mod drafter;
pub mod extractor;
pub mod ingress;
pub mod job_queue;
pub mod redaction;
pub mod store;
pub mod worker;

pub mod executor;
pub mod ingest;
pub mod outbox_sender;
pub mod scheduler;

pub use channel::Channel;
pub use config::PipelineConfig;
pub use job_queue::{JobKind, JobPayload, JobQueue};
pub use store::Store;
pub use worker::WorkerControl;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
