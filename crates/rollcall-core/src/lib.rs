//! rollcall-core — biometric attendance matching engine.
//!
//! Turns enrolled face samples into a per-identity template, scores live
//! embeddings against templates, and converts accepted verifications into
//! idempotent attendance records. Feature extraction and persistence are
//! reached only through the traits in [`extractor`] and [`store`].

pub mod attendance;
pub mod enroll;
pub mod extractor;
pub mod matcher;
pub mod store;
pub mod types;

pub use attendance::{
    record_if_absent, AttendanceRecord, Cooldown, CooldownPolicy, RecordError, RecordOutcome,
};
pub use enroll::{enroll, EnrollError, EnrollOutcome, EnrollPolicy, SampleStatus};
pub use extractor::{ExtractionError, FeatureExtractor};
pub use matcher::{CosineMatcher, MatchPolicy, MatchResult, Matcher, ScoreAggregation};
pub use store::{AttendanceLedger, LedgerInsert, StoreError, StoredTemplate, TemplateStore};
pub use types::{Embedding, EnrollmentStatus, Identity, IncompatibleEmbedding, Template};
