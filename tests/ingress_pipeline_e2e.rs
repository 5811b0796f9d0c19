mod test_support;

use std::time::Duration;

use chrono::Utc;
use followup_module::extractor::Extractor;
use followup_module::ingest::process_ingest_job;
use followup_module::ingress::{process_inbound_event, InboundEvent, IngressOutcome};
use followup_module::job_queue::{JobKind, JobPayload};
use followup_module::store::{Preferences, UserRecord, RETENTION_MARKER};
use followup_module::{Channel, JobQueue, Store};
use uuid::Uuid;

use test_support::{require_database_url, start_mockito_server, TestSchema};

fn seed_user(store: &Store, user_id: &str, email: &str) {
    store
        .insert_user(&UserRecord {
            user_id: user_id.to_string(),
            primary_email: Some(email.to_string()),
            chat_number: None,
            display_name: "Alice".to_string(),
            status: "active".to_string(),
        })
        .expect("seed user");
    store
        .upsert_preferences(user_id, &Preferences::default())
        .expect("seed preferences");
}

fn email_event(message_id: &str, from: &str, text: &str) -> InboundEvent {
    InboundEvent {
        channel: Channel::Email,
        provider_message_id: message_id.to_string(),
        sender_address: from.to_string(),
        text: text.to_string(),
        subject: Some("follow up".to_string()),
    }
}

#[test]
fn first_webhook_is_accepted_and_second_is_duplicate() {
    let Some(base_url) = require_database_url("first_webhook_is_accepted_and_second_is_duplicate")
    else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let event = email_event("msg-1", "alice@example.com", "remind me to call Raj friday");

    let first = process_inbound_event(&store, &queue, &event).expect("first event");
    let IngressOutcome::Accepted { inbound_id } = first else {
        panic!("expected accepted, got {first:?}");
    };

    let inbound = store
        .load_inbound(inbound_id)
        .expect("load inbound")
        .expect("inbound exists");
    assert_eq!(inbound.idempotency_key, "alice-1:msg-1");

    let second = process_inbound_event(&store, &queue, &event).expect("second event");
    assert_eq!(second, IngressOutcome::Duplicate);

    let mut client = schema.client();
    let row = client
        .query_one("SELECT count(*) FROM inbound_messages", &[])
        .expect("count");
    let count: i64 = row.get(0);
    assert_eq!(count, 1, "exactly one inbound row after duplicate webhook");

    // Second-layer dedup: only one ingest job despite two deliveries.
    let job_row = client
        .query_one("SELECT count(*) FROM jobs WHERE kind = 'ingest'", &[])
        .expect("job count");
    let jobs: i64 = job_row.get(0);
    assert_eq!(jobs, 1);
}

#[test]
fn unknown_sender_is_ignored_without_persistence() {
    let Some(base_url) = require_database_url("unknown_sender_is_ignored_without_persistence")
    else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let event = email_event("msg-9", "stranger@example.com", "who dis");
    let outcome = process_inbound_event(&store, &queue, &event).expect("event");
    assert_eq!(outcome, IngressOutcome::Ignored);

    let mut client = schema.client();
    let row = client
        .query_one("SELECT count(*) FROM inbound_messages", &[])
        .expect("count");
    let count: i64 = row.get(0);
    assert_eq!(count, 0, "unknown senders leave no rows behind");
}

#[test]
fn ingest_creates_scheduled_task_with_confirmation_exactly_once() {
    let Some(base_url) =
        require_database_url("ingest_creates_scheduled_task_with_confirmation_exactly_once")
    else {
        return;
    };
    let Some(mut server) =
        start_mockito_server("ingest_creates_scheduled_task_with_confirmation_exactly_once")
    else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    // The extractor must be consulted at most once across webhook retries
    // and job replays.
    let extractor_mock = server
        .mock("POST", "/v1/extract")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
                "needs_clarification": false,
                "clarifying_question": "",
                "due_at_iso": "2026-08-10T16:00:00Z",
                "action_type": "remind",
                "contact_hint": "Raj",
                "context": "the Q3 numbers"
            }"#,
        )
        .expect(1)
        .create();
    let extractor =
        Extractor::new(&server.url(), None, Duration::from_secs(5)).expect("extractor");

    let event = email_event("msg-2", "alice@example.com", "remind me about Raj's Q3 numbers");
    process_inbound_event(&store, &queue, &event).expect("ingress");

    let job = queue
        .claim_next(JobKind::Ingest)
        .expect("claim")
        .expect("ingest job queued");
    let JobPayload::Ingest { inbound_id, .. } = job.payload else {
        panic!("expected ingest payload");
    };

    process_ingest_job(&store, &extractor, inbound_id).expect("ingest");
    // Replay after a crashed ack: the processed gate makes it a no-op.
    process_ingest_job(&store, &extractor, inbound_id).expect("ingest replay");
    extractor_mock.assert();

    let mut client = schema.client();
    let task_row = client
        .query_one(
            "SELECT task_id, status, due_at IS NOT NULL FROM tasks WHERE source_inbound_id = $1",
            &[&inbound_id],
        )
        .expect("task row");
    let task_id: Uuid = task_row.get(0);
    let status: String = task_row.get(1);
    let has_due: bool = task_row.get(2);
    assert_eq!(status, "pending");
    assert!(has_due);

    let outbox_row = client
        .query_one(
            "SELECT count(*), min(body) FROM outbox_messages WHERE task_id = $1",
            &[&task_id],
        )
        .expect("outbox row");
    let outbox_count: i64 = outbox_row.get(0);
    let body: Option<String> = outbox_row.get(1);
    assert_eq!(outbox_count, 1, "one confirmation despite the replay");
    assert!(body.unwrap().contains("Raj"));

    let inbound = store
        .load_inbound(inbound_id)
        .expect("load")
        .expect("exists");
    assert_eq!(inbound.status.as_str(), "processed");

    let events = store.list_task_events(task_id).expect("events");
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["created", "scheduled"]);
}

#[test]
fn extractor_failure_produces_clarification_task() {
    let Some(base_url) = require_database_url("extractor_failure_produces_clarification_task")
    else {
        return;
    };
    let Some(mut server) = start_mockito_server("extractor_failure_produces_clarification_task")
    else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let _extractor_mock = server
        .mock("POST", "/v1/extract")
        .with_status(503)
        .with_body("model overloaded")
        .create();
    let extractor =
        Extractor::new(&server.url(), None, Duration::from_secs(5)).expect("extractor");

    let event = email_event("msg-3", "alice@example.com", "do the thing sometime");
    process_inbound_event(&store, &queue, &event).expect("ingress");
    let job = queue
        .claim_next(JobKind::Ingest)
        .expect("claim")
        .expect("job");
    let JobPayload::Ingest { inbound_id, .. } = job.payload else {
        panic!("expected ingest payload");
    };
    process_ingest_job(&store, &extractor, inbound_id).expect("ingest");

    let mut client = schema.client();
    let row = client
        .query_one(
            "SELECT task_id, status, due_at IS NULL FROM tasks WHERE source_inbound_id = $1",
            &[&inbound_id],
        )
        .expect("task");
    let task_id: Uuid = row.get(0);
    let status: String = row.get(1);
    let due_is_null: bool = row.get(2);
    assert_eq!(status, "needs_clarification");
    assert!(due_is_null, "clarification tasks carry no due time");

    let outbox = client
        .query_one(
            "SELECT body FROM outbox_messages WHERE task_id = $1",
            &[&task_id],
        )
        .expect("outbox");
    let body: String = outbox.get(0);
    assert!(body.contains("When should I remind you?"), "{body}");

    let events = store.list_task_events(task_id).expect("events");
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["created", "clarification_sent"]);
}

#[test]
fn retention_sweep_redacts_old_inbound_text() {
    let Some(base_url) = require_database_url("retention_sweep_redacts_old_inbound_text") else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let event = email_event("msg-old", "alice@example.com", "ancient history");
    let IngressOutcome::Accepted { inbound_id } =
        process_inbound_event(&store, &queue, &event).expect("ingress")
    else {
        panic!("expected accepted");
    };

    let mut client = schema.client();
    client
        .execute(
            "UPDATE inbound_messages SET received_at = now() - interval '90 days'
             WHERE inbound_id = $1",
            &[&inbound_id],
        )
        .expect("age row");

    let cutoff = Utc::now() - chrono::Duration::days(60);
    let redacted = store.redact_inbound_older_than(cutoff).expect("sweep");
    assert_eq!(redacted, 1);

    let inbound = store
        .load_inbound(inbound_id)
        .expect("load")
        .expect("exists");
    assert_eq!(inbound.raw_text_redacted, RETENTION_MARKER);

    // Idempotent: a second sweep touches nothing.
    let again = store.redact_inbound_older_than(cutoff).expect("sweep again");
    assert_eq!(again, 0);
}
