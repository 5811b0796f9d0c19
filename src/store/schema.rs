pub(super) const PIPELINE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    primary_email TEXT UNIQUE,
    chat_number TEXT UNIQUE,
    display_name TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS user_preferences (
    user_id TEXT PRIMARY KEY REFERENCES users(user_id) ON DELETE CASCADE,
    timezone TEXT NOT NULL DEFAULT 'UTC',
    tone TEXT NOT NULL DEFAULT 'friendly',
    default_action TEXT NOT NULL DEFAULT 'remind',
    fallback_channel TEXT NOT NULL DEFAULT 'email'
);

CREATE TABLE IF NOT EXISTS inbound_messages (
    inbound_id UUID PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(user_id),
    channel TEXT NOT NULL,
    provider_message_id TEXT NOT NULL,
    idempotency_key TEXT NOT NULL UNIQUE,
    raw_text_redacted TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'received',
    received_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id UUID PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES users(user_id),
    source_inbound_id UUID UNIQUE REFERENCES inbound_messages(inbound_id),
    due_at TIMESTAMPTZ,
    action_type TEXT NOT NULL,
    contact_hint TEXT NOT NULL DEFAULT '',
    context TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_attempt_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS tasks_pending_due_idx
    ON tasks(due_at) WHERE status = 'pending';

CREATE TABLE IF NOT EXISTS outbox_messages (
    outbox_id UUID PRIMARY KEY,
    task_id UUID REFERENCES tasks(task_id),
    user_id TEXT NOT NULL REFERENCES users(user_id),
    channel TEXT NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT,
    body TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    attempts INTEGER NOT NULL DEFAULT 0,
    next_retry_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS outbox_sendable_idx
    ON outbox_messages(next_retry_at) WHERE status = 'queued';

CREATE TABLE IF NOT EXISTS task_events (
    event_id BIGSERIAL PRIMARY KEY,
    task_id UUID NOT NULL REFERENCES tasks(task_id),
    user_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS task_events_task_idx
    ON task_events(task_id, event_id);
"#;
