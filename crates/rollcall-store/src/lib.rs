//! SQLite persistence for Rollcall.
//!
//! One database file holds the identity registry, the per-identity
//! template (compare-and-swap on a revision column), and the append-only
//! attendance ledger. All writes run in `IMMEDIATE` transactions, so the
//! check-then-write sequences the engine relies on are atomic even when
//! several processes share the file.

mod ledger;
mod seal;
mod templates;

pub use seal::{SealError, TemplateCipher};

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};

use rollcall_core::store::StoreError;
use rollcall_core::types::{EnrollmentStatus, Identity};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id           TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS templates (
    identity_id       TEXT PRIMARY KEY REFERENCES identities(id),
    revision          INTEGER NOT NULL,
    extractor_version TEXT NOT NULL,
    dimensionality    INTEGER NOT NULL,
    sample_count      INTEGER NOT NULL,
    created_at        TEXT NOT NULL,
    payload           BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id          TEXT PRIMARY KEY,
    identity_id TEXT NOT NULL REFERENCES identities(id),
    score       REAL NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS attendance_identity_time
    ON attendance(identity_id, recorded_at);
";

/// Connection-owning store. Implements both of the engine's storage
/// traits; open one per thread or process, never share a handle.
pub struct SqliteStore {
    pub(crate) conn: Connection,
    pub(crate) cipher: Option<TemplateCipher>,
}

impl SqliteStore {
    /// Open (creating if absent) the database at `path`. A `key` turns on
    /// AES-256-GCM sealing of template payloads.
    pub fn open(path: &Path, key: Option<[u8; 32]>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        // WAL lets a reader proceed while another process writes.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(backend)?;
        Self::init(conn, key)
    }

    /// In-memory database for tests. No WAL; nothing to share.
    pub fn open_in_memory(key: Option<[u8; 32]>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn, key)
    }

    fn init(conn: Connection, key: Option<[u8; 32]>) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(backend)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn,
            cipher: key.map(|k| TemplateCipher::new(&k)),
        })
    }

    /// Register an identity, or update its display name if already known.
    pub fn provision(&mut self, id: &str, display_name: &str) -> Result<Identity, StoreError> {
        let created_at = now_rfc3339();
        self.conn
            .execute(
                "INSERT INTO identities (id, display_name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
                params![id, display_name, created_at],
            )
            .map_err(backend)?;
        tracing::info!(identity = id, "identity provisioned");
        self.identity(id)?
            .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))
    }

    /// Look up one identity; enrollment status is derived from template
    /// presence, never stored.
    pub fn identity(&mut self, id: &str) -> Result<Option<Identity>, StoreError> {
        self.conn
            .query_row(
                "SELECT i.id, i.display_name,
                        EXISTS(SELECT 1 FROM templates t WHERE t.identity_id = i.id)
                 FROM identities i WHERE i.id = ?1",
                params![id],
                |row| {
                    Ok(Identity {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        status: if row.get::<_, bool>(2)? {
                            EnrollmentStatus::Enrolled
                        } else {
                            EnrollmentStatus::Unenrolled
                        },
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    /// All provisioned identities, ordered by id.
    pub fn identities(&mut self) -> Result<Vec<Identity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT i.id, i.display_name,
                        EXISTS(SELECT 1 FROM templates t WHERE t.identity_id = i.id)
                 FROM identities i ORDER BY i.id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Identity {
                    id: row.get(0)?,
                    display_name: row.get(1)?,
                    status: if row.get::<_, bool>(2)? {
                        EnrollmentStatus::Enrolled
                    } else {
                        EnrollmentStatus::Unenrolled
                    },
                })
            })
            .map_err(backend)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(backend)
    }

    pub(crate) fn identity_exists(conn: &Connection, id: &str) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM identities WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )
        .map_err(backend)
    }
}

pub(crate) fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub(crate) fn now_rfc3339() -> String {
    fmt_timestamp(chrono::Utc::now())
}

/// RFC 3339 UTC with millisecond precision and a `Z` suffix. Fixed-width,
/// so SQL text comparisons order the same way the timestamps do.
pub(crate) fn fmt_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(
    identity_id: &str,
    raw: &str,
) -> Result<chrono::DateTime<chrono::Utc>, StoreError> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|err| StoreError::Corrupt {
            identity_id: identity_id.to_string(),
            message: format!("bad timestamp '{raw}': {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_then_lookup() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.provision("u1", "Ana Wijaya").unwrap();

        let identity = store.identity("u1").unwrap().unwrap();
        assert_eq!(identity.display_name, "Ana Wijaya");
        assert_eq!(identity.status, EnrollmentStatus::Unenrolled);
        assert!(store.identity("ghost").unwrap().is_none());
    }

    #[test]
    fn provision_twice_updates_display_name() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.provision("u1", "Ana").unwrap();
        let identity = store.provision("u1", "Ana Wijaya").unwrap();
        assert_eq!(identity.display_name, "Ana Wijaya");
        assert_eq!(store.identities().unwrap().len(), 1);
    }

    #[test]
    fn identities_are_ordered_by_id() {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.provision("b", "B").unwrap();
        store.provision("a", "A").unwrap();
        let ids: Vec<String> = store
            .identities()
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
