//! SQL schema for the gantry SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- One row per entity record, whatever its type. Fields contributed by
-- capabilities live in dedicated columns so SQL can filter on them; the
-- columns a type declares for itself are packed into the `fields` JSON
-- document.
CREATE TABLE IF NOT EXISTS records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    type_name   TEXT NOT NULL,
    uid         INTEGER,            -- Owned: owning user
    gid         INTEGER,            -- Owned: owning group
    parent_id   INTEGER,            -- Nested: self-reference by id
    created     TEXT,               -- Meta: ISO 8601 UTC
    updated     TEXT,               -- Meta: ISO 8601 UTC
    data        TEXT,               -- Blobform: JSON document
    fid         INTEGER,            -- Blobform: overriding form record
    fields      TEXT NOT NULL DEFAULT '{}'
);

-- Links from an owning record to its side records (logs, comments, tags,
-- todos). Side records are ordinary `records` rows of their own type;
-- deleting an owner removes its links but never the side rows.
CREATE TABLE IF NOT EXISTS record_links (
    owner_type  TEXT    NOT NULL,
    owner_id    INTEGER NOT NULL,
    kind        TEXT    NOT NULL,
    target_id   INTEGER NOT NULL REFERENCES records(id),
    PRIMARY KEY (owner_type, owner_id, kind, target_id)
);

CREATE TABLE IF NOT EXISTS users (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL UNIQUE,
    gid       INTEGER,
    settings  TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS records_type_idx    ON records(type_name);
CREATE INDEX IF NOT EXISTS records_parent_idx  ON records(type_name, parent_id);
CREATE INDEX IF NOT EXISTS record_links_owner_idx
    ON record_links(owner_type, owner_id);

PRAGMA user_version = 1;
";
