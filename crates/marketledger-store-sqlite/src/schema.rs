//! SQL schema for the ledger's SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS markets (
    market_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    timezone    TEXT NOT NULL,   -- IANA name; not validated here
    created_at  TEXT NOT NULL
);

-- Operations are strictly append-only; the triggers below reject UPDATE and
-- DELETE. market_id has no foreign key; facts stay readable if
-- a market record goes missing.
CREATE TABLE IF NOT EXISTS operations (
    operation_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id            INTEGER NOT NULL,
    entity_type          TEXT,            -- 'market_space' or NULL
    entity_id            INTEGER,
    operation_type       TEXT NOT NULL,   -- OperationType discriminant
    effective_at         TEXT NOT NULL,   -- RFC 3339 UTC, microseconds
    effective_tz         TEXT NOT NULL,   -- IANA name at creation time
    effective_month      TEXT NOT NULL,   -- YYYY-MM-01 in effective_tz
    status               TEXT NOT NULL DEFAULT 'applied',
    payload_json         TEXT NOT NULL,
    comment              TEXT,
    created_by           INTEGER,
    cancels_operation_id INTEGER REFERENCES operations(operation_id),
    recorded_at          TEXT NOT NULL,
    CHECK ((entity_type IS NULL) = (entity_id IS NULL))
);

CREATE TRIGGER IF NOT EXISTS operations_no_update
BEFORE UPDATE ON operations
BEGIN
    SELECT RAISE(ABORT, 'operations are append-only');
END;

CREATE TRIGGER IF NOT EXISTS operations_no_delete
BEFORE DELETE ON operations
BEGIN
    SELECT RAISE(ABORT, 'operations are append-only');
END;

CREATE TABLE IF NOT EXISTS accruals (
    accrual_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    market_id       INTEGER NOT NULL,
    market_space_id INTEGER NOT NULL,
    period          TEXT NOT NULL,   -- YYYY-MM-01
    amount          REAL NOT NULL,
    recorded_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS operations_entity_idx
    ON operations(market_id, entity_type, entity_id, operation_type, effective_at);
CREATE INDEX IF NOT EXISTS operations_type_idx
    ON operations(market_id, operation_type, effective_at);
CREATE INDEX IF NOT EXISTS operations_month_idx
    ON operations(market_id, effective_month);
CREATE INDEX IF NOT EXISTS accruals_period_idx
    ON accruals(market_id, period);

PRAGMA user_version = 1;
";
