//! Storage traits the engine runs against.
//!
//! Both traits demand per-identity atomicity from their implementations:
//! `replace` is a compare-and-swap on the template revision, and
//! `insert_if_absent` performs its check-then-insert inside one
//! serializable operation. That closes the races between reading the old
//! template and committing the new one, and between checking the cooldown
//! and inserting the record.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::attendance::AttendanceRecord;
use crate::types::Template;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The template revision moved under a compare-and-swap replace.
    /// Indicates a concurrent enrollment; callers re-read and may retry.
    #[error("concurrent template update for identity '{identity_id}'")]
    Conflict { identity_id: String },
    #[error("unknown identity '{0}'")]
    UnknownIdentity(String),
    #[error("stored data for identity '{identity_id}' is unreadable: {message}")]
    Corrupt { identity_id: String, message: String },
    #[error("storage backend: {0}")]
    Backend(String),
}

/// A template together with the store revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTemplate {
    pub template: Template,
    pub revision: i64,
}

/// Persists at most one template per identity.
pub trait TemplateStore {
    fn get(&mut self, identity_id: &str) -> Result<Option<StoredTemplate>, StoreError>;

    /// Atomically replace (or create) the identity's template.
    ///
    /// `expected_revision` must equal the revision currently stored —
    /// `None` asserts no template exists yet. Any mismatch fails with
    /// [`StoreError::Conflict`] and leaves the prior template untouched.
    /// Returns the new revision.
    fn replace(
        &mut self,
        identity_id: &str,
        template: &Template,
        expected_revision: Option<i64>,
    ) -> Result<i64, StoreError>;
}

/// Result of an [`AttendanceLedger::insert_if_absent`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerInsert {
    Inserted,
    /// A record for the identity already existed at or after the cutoff;
    /// the insert was suppressed and the existing record is returned.
    Duplicate(AttendanceRecord),
}

/// Append-only ledger of attendance facts.
pub trait AttendanceLedger {
    /// Most recent record for the identity, if any.
    fn latest(&mut self, identity_id: &str) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Insert `record` unless the identity already has a record at or
    /// after `cutoff`. Check and insert are atomic per identity: under
    /// concurrent calls exactly one record lands per window.
    fn insert_if_absent(
        &mut self,
        record: &AttendanceRecord,
        cutoff: DateTime<Utc>,
    ) -> Result<LedgerInsert, StoreError>;
}
