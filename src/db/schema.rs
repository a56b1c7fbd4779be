/// Schema for every persisted partition.
pub const SCHEMA: &str = r#"
-- Key/value metadata (partition version, active interception layer)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Binary/text payloads
CREATE TABLE IF NOT EXISTS blobs (
    id TEXT PRIMARY KEY,
    payload BLOB NOT NULL,
    mime_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    content_hash TEXT,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_blobs_accessed ON blobs(last_accessed_at);

-- Structured record snapshots, merged by id (position preserves collection order)
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    owner TEXT,
    payload BLOB NOT NULL,
    position INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_owner ON records(owner, position);

-- Pending mutations, replayed in id order
CREATE TABLE IF NOT EXISTS queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation BLOB NOT NULL,
    target_id TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_status ON queue(status);

-- Interception layer response caches
CREATE TABLE IF NOT EXISTS responses (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers BLOB NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (cache_name, request_key)
);

CREATE INDEX IF NOT EXISTS idx_responses_stored ON responses(cache_name, stored_at);
"#;

/// Tables cleared together when the partition version changes.
pub const PARTITIONS: &[&str] = &["blobs", "records", "queue", "responses"];
