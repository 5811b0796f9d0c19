mod test_support;

use followup_module::scheduler::run_scheduler_tick;
use followup_module::store::{Preferences, UserRecord};
use followup_module::{JobQueue, Store};
use uuid::Uuid;

use test_support::{require_database_url, TestSchema};

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

fn seed_pending_task(client: &mut postgres::Client, user_id: &str, due_offset_minutes: i64) -> Uuid {
    let task_id = Uuid::new_v4();
    client
        .execute(
            "INSERT INTO tasks
                 (task_id, user_id, due_at, action_type, contact_hint, context, status,
                  attempt_count, updated_at)
             VALUES ($1, $2, now() + ($3::bigint * interval '1 minute'),
                     'remind', 'Raj', 'Q3 numbers', 'pending', 0, now())",
            &[&task_id, &user_id, &due_offset_minutes],
        )
        .expect("seed task");
    task_id
}

#[test]
fn tick_claims_past_due_tasks_in_due_order_exactly_once() {
    let Some(base_url) =
        require_database_url("tick_claims_past_due_tasks_in_due_order_exactly_once")
    else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let mut client = schema.client();
    // Three past-due tasks and one future task, mirroring a 10:00 tick over
    // tasks due at 09:00, 09:30, 10:00, and 11:00.
    let due_first = seed_pending_task(&mut client, "alice-1", -60);
    let due_second = seed_pending_task(&mut client, "alice-1", -30);
    let due_third = seed_pending_task(&mut client, "alice-1", 0);
    let future = seed_pending_task(&mut client, "alice-1", 60);

    let claimed = run_scheduler_tick(&store, &queue, 100).expect("tick");
    assert_eq!(claimed, 3, "exactly the past-due tasks transition");

    for task_id in [due_first, due_second, due_third] {
        let task = store.load_task(task_id).expect("load").expect("exists");
        assert_eq!(task.status.as_str(), "due");
    }
    let untouched = store.load_task(future).expect("load").expect("exists");
    assert_eq!(untouched.status.as_str(), "pending");

    // `due` events were written in due_at order.
    let rows = client
        .query(
            "SELECT task_id FROM task_events WHERE event_type = 'due' ORDER BY event_id",
            &[],
        )
        .expect("events");
    let event_order: Vec<Uuid> = rows.into_iter().map(|row| row.get(0)).collect();
    assert_eq!(event_order, vec![due_first, due_second, due_third]);

    // One execute job per claimed task, keyed for dedup.
    let rows = client
        .query(
            "SELECT dedupe_key FROM jobs WHERE kind = 'execute' ORDER BY created_at",
            &[],
        )
        .expect("jobs");
    assert_eq!(rows.len(), 3);
    for (row, task_id) in rows.iter().zip([due_first, due_second, due_third]) {
        let key: String = row.get(0);
        assert_eq!(key, format!("exec:{task_id}"));
    }

    // A second identical tick transitions nothing.
    let again = run_scheduler_tick(&store, &queue, 100).expect("second tick");
    assert_eq!(again, 0);
}

#[test]
fn claim_limit_bounds_one_tick() {
    let Some(base_url) = require_database_url("claim_limit_bounds_one_tick") else {
        return;
    };
    let schema = TestSchema::create(&base_url);
    let store = Store::new(&schema.url).expect("store");
    let queue = JobQueue::new(&schema.url, 60, 5).expect("queue");
    seed_user(&store, "alice-1", "alice@example.com");

    let mut client = schema.client();
    for offset in 1..=5 {
        seed_pending_task(&mut client, "alice-1", -offset);
    }

    let first = run_scheduler_tick(&store, &queue, 2).expect("tick");
    assert_eq!(first, 2, "excess tasks wait for the next tick");
    let second = run_scheduler_tick(&store, &queue, 2).expect("tick");
    assert_eq!(second, 2);
    let third = run_scheduler_tick(&store, &queue, 2).expect("tick");
    assert_eq!(third, 1);
}
