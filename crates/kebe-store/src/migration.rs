//! Database schema migrations for SQLite.
//!
//! Versioned: each migration moves the schema from version N to N+1 and is
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::now_millis;

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL UNIQUE,     -- stable public identifier
            username TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,          -- authentication identity
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            name TEXT NOT NULL,
            sha3_384 TEXT NOT NULL UNIQUE,       -- key id
            encoded_public_key TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE TABLE snap_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            snap_id TEXT NOT NULL UNIQUE,        -- store-assigned uuid
            account_id INTEGER NOT NULL REFERENCES accounts(id),
            snap_type TEXT NOT NULL DEFAULT 'app',
            confinement TEXT,                    -- strict | classic | devmode
            base TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        -- One row per distinct binary of a snap; id is the revision number.
        CREATE TABLE snap_revisions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snap_entry_id INTEGER NOT NULL REFERENCES snap_entries(id),
            filename TEXT NOT NULL,              -- key in the snaps bucket
            sha3_384 TEXT NOT NULL,              -- lowercase hex, '' for the placeholder
            sha3_384_encoded TEXT NOT NULL,
            size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,

            UNIQUE(snap_entry_id, sha3_384)
        );

        CREATE TABLE snap_tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snap_entry_id INTEGER NOT NULL REFERENCES snap_entries(id),
            name TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,

            UNIQUE(snap_entry_id, name)
        );

        CREATE TABLE snap_risks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snap_track_id INTEGER NOT NULL REFERENCES snap_tracks(id),
            name TEXT NOT NULL,                  -- stable | candidate | beta | edge
            snap_revision_id INTEGER NOT NULL REFERENCES snap_revisions(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,

            UNIQUE(snap_track_id, name)
        );

        CREATE TABLE snap_branches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snap_risk_id INTEGER NOT NULL REFERENCES snap_risks(id),
            name TEXT NOT NULL,
            snap_revision_id INTEGER NOT NULL REFERENCES snap_revisions(id),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER,

            UNIQUE(snap_risk_id, name)
        );

        CREATE TABLE snap_uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            up_down_id TEXT NOT NULL UNIQUE,
            snap_entry_id INTEGER NOT NULL REFERENCES snap_entries(id),
            filesize INTEGER NOT NULL,
            channels BLOB NOT NULL,              -- CBOR array of channel names
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        );

        CREATE INDEX idx_keys_account ON keys(account_id);
        CREATE INDEX idx_snap_entries_account ON snap_entries(account_id);
        CREATE INDEX idx_snap_revisions_encoded ON snap_revisions(sha3_384_encoded);
        CREATE INDEX idx_snap_risks_revision ON snap_risks(snap_revision_id);
        "#,
    )?;

    Ok(())
}
