//! Attendance ledger: append-only rows, one per identity per cooldown window.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use rollcall_core::attendance::AttendanceRecord;
use rollcall_core::store::{AttendanceLedger, LedgerInsert, StoreError};

use crate::{backend, fmt_timestamp, parse_timestamp, SqliteStore};

fn latest_since(
    conn: &Connection,
    identity_id: &str,
    cutoff: Option<&str>,
) -> Result<Option<AttendanceRecord>, StoreError> {
    let sql = match cutoff {
        Some(_) => {
            "SELECT id, score, recorded_at FROM attendance
             WHERE identity_id = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at DESC LIMIT 1"
        }
        None => {
            "SELECT id, score, recorded_at FROM attendance
             WHERE identity_id = ?1
             ORDER BY recorded_at DESC LIMIT 1"
        }
    };

    let map = |row: &rusqlite::Row<'_>| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, f64>(1)?,
            row.get::<_, String>(2)?,
        ))
    };
    let row = match cutoff {
        Some(cutoff) => conn
            .query_row(sql, params![identity_id, cutoff], map)
            .optional(),
        None => conn.query_row(sql, params![identity_id], map).optional(),
    }
    .map_err(backend)?;

    row.map(|(id, score, recorded_at)| {
        Ok(AttendanceRecord {
            id,
            identity_id: identity_id.to_string(),
            score: score as f32,
            recorded_at: parse_timestamp(identity_id, &recorded_at)?,
        })
    })
    .transpose()
}

impl AttendanceLedger for SqliteStore {
    fn latest(&mut self, identity_id: &str) -> Result<Option<AttendanceRecord>, StoreError> {
        latest_since(&self.conn, identity_id, None)
    }

    fn insert_if_absent(
        &mut self,
        record: &AttendanceRecord,
        cutoff: DateTime<Utc>,
    ) -> Result<LedgerInsert, StoreError> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;

        if !SqliteStore::identity_exists(&tx, &record.identity_id)? {
            return Err(StoreError::UnknownIdentity(record.identity_id.clone()));
        }

        let cutoff = fmt_timestamp(cutoff);
        if let Some(existing) = latest_since(&tx, &record.identity_id, Some(&cutoff))? {
            tx.commit().map_err(backend)?;
            return Ok(LedgerInsert::Duplicate(existing));
        }

        tx.execute(
            "INSERT INTO attendance (id, identity_id, score, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.id,
                record.identity_id,
                record.score as f64,
                fmt_timestamp(record.recorded_at),
            ],
        )
        .map_err(backend)?;
        tx.commit().map_err(backend)?;
        Ok(LedgerInsert::Inserted)
    }
}
