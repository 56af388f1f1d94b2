//! Turning accepted verifications into durable, idempotent attendance facts.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::matcher::MatchResult;
use crate::store::{AttendanceLedger, LedgerInsert, StoreError};

/// Window within which repeated accepted verifications for one identity
/// collapse into the already-stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// At most one record per identity per UTC calendar day.
    CalendarDay,
    /// At most one record per identity per sliding duration.
    Rolling(Duration),
}

impl Cooldown {
    /// Earliest timestamp a prior record may carry and still suppress a
    /// new one at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cooldown::CalendarDay => now.date_naive().and_time(NaiveTime::MIN).and_utc(),
            Cooldown::Rolling(window) => now - *window,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    pub window: Cooldown,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            window: Cooldown::CalendarDay,
        }
    }
}

/// Durable fact: the identity was present at `recorded_at` with confidence
/// `score`. Never updated, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub identity_id: String,
    pub score: f32,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of [`record_if_absent`]. Both variants are success: a duplicate
/// clock-in inside the window is a benign, expected race, not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Created(AttendanceRecord),
    AlreadyRecorded(AttendanceRecord),
}

impl RecordOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            RecordOutcome::Created(record) | RecordOutcome::AlreadyRecorded(record) => record,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, RecordOutcome::Created(_))
    }
}

#[derive(Error, Debug)]
pub enum RecordError {
    /// The decision was not an accept. Recording a rejected verification
    /// is a contract violation, never a silent no-op.
    #[error("verification was not accepted; refusing to record attendance")]
    NotAccepted,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Record attendance for `identity_id` unless a record already exists
/// inside the cooldown window ending at `now`.
///
/// The ledger performs the check-then-insert atomically per identity, so
/// two racing calls yield exactly one stored record; the loser receives
/// [`RecordOutcome::AlreadyRecorded`] carrying the winner's record.
pub fn record_if_absent<L: AttendanceLedger>(
    ledger: &mut L,
    identity_id: &str,
    decision: &MatchResult,
    now: DateTime<Utc>,
    policy: &CooldownPolicy,
) -> Result<RecordOutcome, RecordError> {
    if !decision.accepted {
        return Err(RecordError::NotAccepted);
    }

    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        identity_id: identity_id.to_string(),
        score: decision.score,
        recorded_at: now,
    };
    let cutoff = policy.window.cutoff(now);

    match ledger.insert_if_absent(&record, cutoff)? {
        LedgerInsert::Inserted => {
            tracing::info!(
                identity = identity_id,
                score = record.score,
                "attendance recorded"
            );
            Ok(RecordOutcome::Created(record))
        }
        LedgerInsert::Duplicate(existing) => {
            tracing::debug!(
                identity = identity_id,
                existing = %existing.id,
                "attendance already recorded inside cooldown window"
            );
            Ok(RecordOutcome::AlreadyRecorded(existing))
        }
    }
}
