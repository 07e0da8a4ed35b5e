//! SQLite implementation of the Repository trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use kebe_core::{AccountId, Confinement, KeyId, Risk, SnapId, SnapType, DEFAULT_TRACK};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::models::{
    Account, Audit, Key, NewAccount, NewKey, NewSnapEntry, NewSnapRevision, NewSnapUpload, RowId,
    SnapBranch, SnapEntry, SnapMetadata, SnapRevision, SnapRisk, SnapTrack, SnapUpload,
};
use crate::now_millis;
use crate::traits::{InsertResult, Repository};

const ACCOUNT_COLUMNS: &str =
    "id, account_id, username, display_name, email, created_at, updated_at, deleted_at";
const KEY_COLUMNS: &str =
    "id, account_id, name, sha3_384, encoded_public_key, created_at, updated_at, deleted_at";
const SNAP_COLUMNS: &str = "id, name, snap_id, account_id, snap_type, confinement, base, \
                            created_at, updated_at, deleted_at";
const REVISION_COLUMNS: &str = "id, snap_entry_id, filename, sha3_384, sha3_384_encoded, size, \
                                created_at, updated_at, deleted_at";
const TRACK_COLUMNS: &str = "id, snap_entry_id, name, created_at, updated_at, deleted_at";
const RISK_COLUMNS: &str =
    "id, snap_track_id, name, snap_revision_id, created_at, updated_at, deleted_at";
const BRANCH_COLUMNS: &str =
    "id, snap_risk_id, name, snap_revision_id, created_at, updated_at, deleted_at";
const UPLOAD_COLUMNS: &str =
    "id, up_down_id, snap_entry_id, filesize, channels, created_at, updated_at, deleted_at";

/// SQLite-based repository.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::TaskFailed(format!("spawn_blocking failed: {}", e)))?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn conversion_error(column: &str, reason: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("{}: {}", column, reason).into(),
    )
}

fn audit(row: &Row<'_>) -> rusqlite::Result<Audit> {
    Ok(Audit {
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    })
}

fn row_to_account(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get("id")?,
        account_id: AccountId::new(row.get::<_, String>("account_id")?),
        username: row.get("username")?,
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        audit: audit(row)?,
    })
}

fn row_to_key(row: &Row<'_>) -> rusqlite::Result<Key> {
    Ok(Key {
        id: row.get("id")?,
        account: row.get("account_id")?,
        name: row.get("name")?,
        sha3_384: KeyId::new(row.get::<_, String>("sha3_384")?),
        encoded_public_key: row.get("encoded_public_key")?,
        audit: audit(row)?,
    })
}

fn row_to_snap(row: &Row<'_>) -> rusqlite::Result<SnapEntry> {
    let snap_type: String = row.get("snap_type")?;
    let confinement: Option<String> = row.get("confinement")?;
    Ok(SnapEntry {
        id: row.get("id")?,
        name: row.get("name")?,
        snap_id: SnapId::new(row.get::<_, String>("snap_id")?),
        account: row.get("account_id")?,
        snap_type: snap_type
            .parse::<SnapType>()
            .map_err(|e| conversion_error("snap_type", e))?,
        confinement: confinement
            .map(|c| c.parse::<Confinement>())
            .transpose()
            .map_err(|e| conversion_error("confinement", e))?,
        base: row.get("base")?,
        audit: audit(row)?,
    })
}

fn row_to_revision(row: &Row<'_>) -> rusqlite::Result<SnapRevision> {
    Ok(SnapRevision {
        id: row.get("id")?,
        snap_entry: row.get("snap_entry_id")?,
        filename: row.get("filename")?,
        sha3_384: row.get("sha3_384")?,
        sha3_384_encoded: row.get("sha3_384_encoded")?,
        size: row.get::<_, i64>("size")? as u64,
        audit: audit(row)?,
    })
}

fn row_to_track(row: &Row<'_>) -> rusqlite::Result<SnapTrack> {
    Ok(SnapTrack {
        id: row.get("id")?,
        snap_entry: row.get("snap_entry_id")?,
        name: row.get("name")?,
        audit: audit(row)?,
    })
}

fn parse_risk(name: &str) -> rusqlite::Result<Risk> {
    Risk::from_name(name).ok_or_else(|| conversion_error("risk", name))
}

fn row_to_risk(row: &Row<'_>) -> rusqlite::Result<SnapRisk> {
    let name: String = row.get("name")?;
    Ok(SnapRisk {
        id: row.get("id")?,
        track: row.get("snap_track_id")?,
        risk: parse_risk(&name)?,
        revision: row.get("snap_revision_id")?,
        audit: audit(row)?,
    })
}

fn row_to_branch(row: &Row<'_>) -> rusqlite::Result<SnapBranch> {
    Ok(SnapBranch {
        id: row.get("id")?,
        risk: row.get("snap_risk_id")?,
        name: row.get("name")?,
        revision: row.get("snap_revision_id")?,
        audit: audit(row)?,
    })
}

fn row_to_upload(row: &Row<'_>) -> rusqlite::Result<SnapUpload> {
    let channels: Vec<u8> = row.get("channels")?;
    Ok(SnapUpload {
        id: row.get("id")?,
        up_down_id: row.get("up_down_id")?,
        snap_entry: row.get("snap_entry_id")?,
        filesize: row.get::<_, i64>("filesize")? as u64,
        channels: ciborium::from_reader::<Vec<String>, _>(&channels[..])
            .map_err(|e| conversion_error("channels", e))?,
        audit: audit(row)?,
    })
}

fn encode_channels(channels: &[String]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(channels, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Translate constraint failures on insert into domain errors.
fn insert_error(err: rusqlite::Error, what: String) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
        {
            StoreError::NotFound(format!("parent of {}", what))
        }
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::AlreadyExists(what)
        }
        _ => StoreError::Database(err),
    }
}

fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, map).optional()?)
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    map: fn(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn insert_revision(conn: &Connection, rev: &NewSnapRevision, now: i64) -> Result<SnapRevision> {
    conn.execute(
        "INSERT INTO snap_revisions
            (snap_entry_id, filename, sha3_384, sha3_384_encoded, size, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            rev.snap_entry,
            rev.filename,
            rev.sha3_384,
            rev.sha3_384_encoded,
            rev.size as i64,
            now
        ],
    )
    .map_err(|e| insert_error(e, format!("revision {}", rev.sha3_384)))?;

    Ok(SnapRevision {
        id: conn.last_insert_rowid(),
        snap_entry: rev.snap_entry,
        filename: rev.filename.clone(),
        sha3_384: rev.sha3_384.clone(),
        sha3_384_encoded: rev.sha3_384_encoded.clone(),
        size: rev.size,
        audit: Audit::new(now),
    })
}

fn insert_track(
    conn: &Connection,
    snap: RowId,
    name: &str,
    placeholder: RowId,
    now: i64,
) -> Result<SnapTrack> {
    conn.execute(
        "INSERT INTO snap_tracks (snap_entry_id, name, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?3)",
        params![snap, name, now],
    )
    .map_err(|e| insert_error(e, format!("track {}", name)))?;
    let track_id = conn.last_insert_rowid();

    for risk in Risk::ALL {
        conn.execute(
            "INSERT INTO snap_risks (snap_track_id, name, snap_revision_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![track_id, risk.as_str(), placeholder, now],
        )?;
    }

    Ok(SnapTrack {
        id: track_id,
        snap_entry: snap,
        name: name.to_string(),
        audit: Audit::new(now),
    })
}

fn placeholder_id(conn: &Connection, snap: RowId) -> Result<Option<RowId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM snap_revisions
             WHERE snap_entry_id = ?1 AND sha3_384 = '' AND deleted_at IS NULL",
            params![snap],
            |row| row.get(0),
        )
        .optional()?)
}

#[async_trait]
impl Repository for SqliteRepository {
    // ─────────────────────────────────────────────────────────────────────────
    // Accounts and keys
    // ─────────────────────────────────────────────────────────────────────────

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let email = email.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM accounts WHERE email = ?1 AND deleted_at IS NULL",
                    ACCOUNT_COLUMNS
                ),
                params![email],
                row_to_account,
            )
        })
        .await
    }

    async fn account_by_account_id(&self, account_id: &AccountId) -> Result<Option<Account>> {
        let account_id = account_id.as_str().to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM accounts WHERE account_id = ?1 AND deleted_at IS NULL",
                    ACCOUNT_COLUMNS
                ),
                params![account_id],
                row_to_account,
            )
        })
        .await
    }

    async fn account_by_id(&self, id: RowId) -> Result<Option<Account>> {
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM accounts WHERE id = ?1 AND deleted_at IS NULL",
                    ACCOUNT_COLUMNS
                ),
                params![id],
                row_to_account,
            )
        })
        .await
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account> {
        let account = account.clone();
        self.call(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO accounts
                    (account_id, username, display_name, email, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    account.account_id.as_str(),
                    account.username,
                    account.display_name,
                    account.email,
                    now
                ],
            )
            .map_err(|e| insert_error(e, format!("account {}", account.account_id)))?;

            Ok(Account {
                id: conn.last_insert_rowid(),
                account_id: account.account_id,
                username: account.username,
                display_name: account.display_name,
                email: account.email,
                audit: Audit::new(now),
            })
        })
        .await
    }

    async fn add_key(&self, key: &NewKey) -> Result<Key> {
        let key = key.clone();
        self.call(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO keys
                    (account_id, name, sha3_384, encoded_public_key, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    key.account,
                    key.name,
                    key.sha3_384.as_str(),
                    key.encoded_public_key,
                    now
                ],
            )
            .map_err(|e| insert_error(e, format!("key {}", key.sha3_384)))?;

            Ok(Key {
                id: conn.last_insert_rowid(),
                account: key.account,
                name: key.name,
                sha3_384: key.sha3_384,
                encoded_public_key: key.encoded_public_key,
                audit: Audit::new(now),
            })
        })
        .await
    }

    async fn key_by_id(&self, key_id: &KeyId) -> Result<Option<Key>> {
        let key_id = key_id.as_str().to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM keys WHERE sha3_384 = ?1 AND deleted_at IS NULL",
                    KEY_COLUMNS
                ),
                params![key_id],
                row_to_key,
            )
        })
        .await
    }

    async fn list_keys(&self, account: RowId) -> Result<Vec<Key>> {
        self.call(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM keys WHERE account_id = ?1 AND deleted_at IS NULL ORDER BY id",
                    KEY_COLUMNS
                ),
                params![account],
                row_to_key,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Snaps
    // ─────────────────────────────────────────────────────────────────────────

    async fn snap_by_name(&self, name: &str) -> Result<Option<SnapEntry>> {
        let name = name.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_entries WHERE name = ?1 AND deleted_at IS NULL",
                    SNAP_COLUMNS
                ),
                params![name],
                row_to_snap,
            )
        })
        .await
    }

    async fn snap_by_snap_id(&self, snap_id: &SnapId) -> Result<Option<SnapEntry>> {
        let snap_id = snap_id.as_str().to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_entries WHERE snap_id = ?1 AND deleted_at IS NULL",
                    SNAP_COLUMNS
                ),
                params![snap_id],
                row_to_snap,
            )
        })
        .await
    }

    async fn snap_by_id(&self, id: RowId) -> Result<Option<SnapEntry>> {
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_entries WHERE id = ?1 AND deleted_at IS NULL",
                    SNAP_COLUMNS
                ),
                params![id],
                row_to_snap,
            )
        })
        .await
    }

    async fn list_snaps_by_account(&self, account: RowId) -> Result<Vec<SnapEntry>> {
        self.call(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM snap_entries
                     WHERE account_id = ?1 AND deleted_at IS NULL ORDER BY id",
                    SNAP_COLUMNS
                ),
                params![account],
                row_to_snap,
            )
        })
        .await
    }

    async fn list_snaps(&self) -> Result<Vec<SnapEntry>> {
        self.call(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM snap_entries WHERE deleted_at IS NULL ORDER BY id",
                    SNAP_COLUMNS
                ),
                [],
                row_to_snap,
            )
        })
        .await
    }

    async fn create_snap_with_default_tracks(&self, snap: &NewSnapEntry) -> Result<SnapEntry> {
        let snap = snap.clone();
        self.call(move |conn| {
            let now = now_millis();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO snap_entries
                    (name, snap_id, account_id, snap_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    snap.name,
                    snap.snap_id.as_str(),
                    snap.account,
                    snap.snap_type.as_str(),
                    now
                ],
            )
            .map_err(|e| insert_error(e, format!("snap {}", snap.name)))?;
            let id = tx.last_insert_rowid();

            let placeholder = insert_revision(&tx, &NewSnapRevision::placeholder(id), now)?;
            insert_track(&tx, id, DEFAULT_TRACK, placeholder.id, now)?;
            tx.commit()?;

            Ok(SnapEntry {
                id,
                name: snap.name,
                snap_id: snap.snap_id,
                account: snap.account,
                snap_type: snap.snap_type,
                confinement: None,
                base: None,
                audit: Audit::new(now),
            })
        })
        .await
    }

    async fn update_snap_metadata(&self, id: RowId, metadata: &SnapMetadata) -> Result<()> {
        let metadata = metadata.clone();
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE snap_entries
                 SET snap_type = ?1, confinement = ?2, base = ?3, updated_at = ?4
                 WHERE id = ?5 AND deleted_at IS NULL",
                params![
                    metadata.snap_type.as_str(),
                    metadata.confinement.map(|c| c.as_str()),
                    metadata.base,
                    now_millis(),
                    id
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("snap entry {}", id)));
            }
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Revisions
    // ─────────────────────────────────────────────────────────────────────────

    async fn revision_by_digest(
        &self,
        snap: RowId,
        sha3_384: &str,
    ) -> Result<Option<SnapRevision>> {
        let sha3_384 = sha3_384.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_revisions
                     WHERE snap_entry_id = ?1 AND sha3_384 = ?2 AND deleted_at IS NULL",
                    REVISION_COLUMNS
                ),
                params![snap, sha3_384],
                row_to_revision,
            )
        })
        .await
    }

    async fn revision_by_id(&self, id: RowId) -> Result<Option<SnapRevision>> {
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_revisions WHERE id = ?1 AND deleted_at IS NULL",
                    REVISION_COLUMNS
                ),
                params![id],
                row_to_revision,
            )
        })
        .await
    }

    async fn revision_by_encoded_digest(&self, encoded: &str) -> Result<Option<SnapRevision>> {
        if encoded.is_empty() {
            return Ok(None);
        }
        let encoded = encoded.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_revisions
                     WHERE sha3_384_encoded = ?1 AND deleted_at IS NULL
                     ORDER BY id LIMIT 1",
                    REVISION_COLUMNS
                ),
                params![encoded],
                row_to_revision,
            )
        })
        .await
    }

    async fn create_revision(
        &self,
        revision: &NewSnapRevision,
    ) -> Result<InsertResult<SnapRevision>> {
        let revision = revision.clone();
        self.call(move |conn| {
            let now = now_millis();
            let inserted = conn
                .execute(
                    "INSERT INTO snap_revisions
                        (snap_entry_id, filename, sha3_384, sha3_384_encoded, size,
                         created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                     ON CONFLICT(snap_entry_id, sha3_384) DO NOTHING",
                    params![
                        revision.snap_entry,
                        revision.filename,
                        revision.sha3_384,
                        revision.sha3_384_encoded,
                        revision.size as i64,
                        now
                    ],
                )
                .map_err(|e| insert_error(e, format!("revision {}", revision.sha3_384)))?;

            let row = query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_revisions WHERE snap_entry_id = ?1 AND sha3_384 = ?2",
                    REVISION_COLUMNS
                ),
                params![revision.snap_entry, revision.sha3_384],
                row_to_revision,
            )?
            .ok_or_else(|| StoreError::InvalidData("revision vanished after insert".into()))?;

            Ok(if inserted == 1 {
                InsertResult::Inserted(row)
            } else {
                InsertResult::AlreadyExists(row)
            })
        })
        .await
    }

    async fn placeholder_revision(&self, snap: RowId) -> Result<Option<SnapRevision>> {
        self.revision_by_digest(snap, "").await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Channels
    // ─────────────────────────────────────────────────────────────────────────

    async fn add_track(&self, snap: RowId, name: &str) -> Result<SnapTrack> {
        let name = name.to_string();
        self.call(move |conn| {
            let placeholder = placeholder_id(conn, snap)?.ok_or_else(|| {
                StoreError::NotFound(format!("placeholder revision for snap {}", snap))
            })?;
            let tx = conn.transaction()?;
            let track = insert_track(&tx, snap, &name, placeholder, now_millis())?;
            tx.commit()?;
            Ok(track)
        })
        .await
    }

    async fn track_by_name(&self, snap: RowId, name: &str) -> Result<Option<SnapTrack>> {
        let name = name.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_tracks
                     WHERE snap_entry_id = ?1 AND name = ?2 AND deleted_at IS NULL",
                    TRACK_COLUMNS
                ),
                params![snap, name],
                row_to_track,
            )
        })
        .await
    }

    async fn list_tracks(&self, snap: RowId) -> Result<Vec<SnapTrack>> {
        self.call(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM snap_tracks
                     WHERE snap_entry_id = ?1 AND deleted_at IS NULL ORDER BY id",
                    TRACK_COLUMNS
                ),
                params![snap],
                row_to_track,
            )
        })
        .await
    }

    async fn risk_by_track(&self, track: RowId, risk: Risk) -> Result<Option<SnapRisk>> {
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_risks
                     WHERE snap_track_id = ?1 AND name = ?2 AND deleted_at IS NULL",
                    RISK_COLUMNS
                ),
                params![track, risk.as_str()],
                row_to_risk,
            )
        })
        .await
    }

    async fn list_risks(&self, track: RowId) -> Result<Vec<SnapRisk>> {
        let mut risks = self
            .call(move |conn| {
                query_all(
                    conn,
                    &format!(
                        "SELECT {} FROM snap_risks WHERE snap_track_id = ?1 AND deleted_at IS NULL",
                        RISK_COLUMNS
                    ),
                    params![track],
                    row_to_risk,
                )
            })
            .await?;
        risks.sort_by_key(|r| r.risk);
        Ok(risks)
    }

    async fn set_risk_revision(&self, risk: RowId, revision: RowId) -> Result<()> {
        self.set_risk_revisions(&[risk], revision).await
    }

    async fn set_risk_revisions(&self, risks: &[RowId], revision: RowId) -> Result<()> {
        let risks = risks.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT id FROM snap_revisions WHERE id = ?1 AND deleted_at IS NULL",
                    params![revision],
                    |row| row.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("revision {}", revision)));
            }

            let now = now_millis();
            for risk in &risks {
                let changed = tx.execute(
                    "UPDATE snap_risks SET snap_revision_id = ?1, updated_at = ?2
                     WHERE id = ?3 AND deleted_at IS NULL",
                    params![revision, now, risk],
                )?;
                if changed == 0 {
                    // dropping tx rolls back the earlier updates
                    return Err(StoreError::NotFound(format!("risk {}", risk)));
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn add_branch(&self, risk: RowId, name: &str, revision: RowId) -> Result<SnapBranch> {
        let name = name.to_string();
        self.call(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT INTO snap_branches
                    (snap_risk_id, name, snap_revision_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![risk, name, revision, now],
            )
            .map_err(|e| insert_error(e, format!("branch {}", name)))?;

            Ok(SnapBranch {
                id: conn.last_insert_rowid(),
                risk,
                name,
                revision,
                audit: Audit::new(now),
            })
        })
        .await
    }

    async fn list_branches(&self, risk: RowId) -> Result<Vec<SnapBranch>> {
        self.call(move |conn| {
            query_all(
                conn,
                &format!(
                    "SELECT {} FROM snap_branches
                     WHERE snap_risk_id = ?1 AND deleted_at IS NULL ORDER BY id",
                    BRANCH_COLUMNS
                ),
                params![risk],
                row_to_branch,
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Uploads
    // ─────────────────────────────────────────────────────────────────────────

    async fn add_upload(&self, upload: &NewSnapUpload) -> Result<SnapUpload> {
        let upload = upload.clone();
        self.call(move |conn| {
            let now = now_millis();
            let channels = encode_channels(&upload.channels)?;
            conn.execute(
                "INSERT INTO snap_uploads
                    (up_down_id, snap_entry_id, filesize, channels, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    upload.up_down_id,
                    upload.snap_entry,
                    upload.filesize as i64,
                    channels,
                    now
                ],
            )
            .map_err(|e| insert_error(e, format!("upload {}", upload.up_down_id)))?;

            Ok(SnapUpload {
                id: conn.last_insert_rowid(),
                up_down_id: upload.up_down_id,
                snap_entry: upload.snap_entry,
                filesize: upload.filesize,
                channels: upload.channels,
                audit: Audit::new(now),
            })
        })
        .await
    }

    async fn upload_by_up_down_id(&self, up_down_id: &str) -> Result<Option<SnapUpload>> {
        let up_down_id = up_down_id.to_string();
        self.call(move |conn| {
            query_one(
                conn,
                &format!(
                    "SELECT {} FROM snap_uploads WHERE up_down_id = ?1 AND deleted_at IS NULL",
                    UPLOAD_COLUMNS
                ),
                params![up_down_id],
                row_to_upload,
            )
        })
        .await
    }

    async fn delete_upload(&self, up_down_id: &str) -> Result<()> {
        let up_down_id = up_down_id.to_string();
        self.call(move |conn| {
            let now = now_millis();
            conn.execute(
                "UPDATE snap_uploads SET deleted_at = ?1, updated_at = ?1
                 WHERE up_down_id = ?2 AND deleted_at IS NULL",
                params![now, up_down_id],
            )?;
            Ok(())
        })
        .await
    }
}
