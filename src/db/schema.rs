/// Schema for the worker database.
pub const SCHEMA: &str = r#"
-- Named cache partitions, in creation order
CREATE TABLE IF NOT EXISTS partitions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by normalized request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    partition_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (partition_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_key ON cache_entries(request_key);

-- Mutations waiting for remote confirmation (seq preserves enqueue order)
CREATE TABLE IF NOT EXISTS pending_writes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    resource_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    credential TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

-- Outstanding reconnect signals
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Active and waiting worker versions
CREATE TABLE IF NOT EXISTS registration (
    slot TEXT PRIMARY KEY CHECK (slot IN ('active', 'waiting')),
    version TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
