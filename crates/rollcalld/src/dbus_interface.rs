//! D-Bus surface for the Rollcall daemon.
//!
//! Bus name: org.rollcall.Attendance1
//! Object path: /org/rollcall/Attendance1
//!
//! Requests and responses are JSON strings; embeddings arrive either
//! pre-extracted (`Verify`/`Enroll`) or as raw image bytes
//! (`VerifyImage`/`EnrollImages`) for deployments that configure an
//! extractor in the daemon.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use zbus::interface;

use rollcall_core::enroll::SampleStatus;
use rollcall_core::types::Embedding;
use rollcall_core::RecordOutcome;

use crate::engine::{EngineError, EngineHandle, SampleInput, VerifyOutcome};

/// Static facts reported by `Status`.
pub struct StatusInfo {
    pub db_path: String,
    pub sealed_templates: bool,
    pub match_threshold: f32,
    pub min_samples: usize,
    pub cooldown: String,
}

pub struct AttendanceService {
    engine: EngineHandle,
    timeout: Duration,
    status: StatusInfo,
}

impl AttendanceService {
    pub fn new(engine: EngineHandle, timeout: Duration, status: StatusInfo) -> Self {
        Self {
            engine,
            timeout,
            status,
        }
    }

    /// Await an engine reply within the configured bound. Input errors map
    /// to InvalidArgs so callers can fix and resubmit; everything else —
    /// including a timeout — is a retryable failure. The engine commits in
    /// single transactions, so abandoning a reply leaves no partial state.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, EngineError>>,
    ) -> zbus::fdo::Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if err.is_input_error() => {
                Err(zbus::fdo::Error::InvalidArgs(err.to_string()))
            }
            Ok(Err(err)) => Err(zbus::fdo::Error::Failed(err.to_string())),
            Err(_) => Err(zbus::fdo::Error::Failed(
                "operation timed out; safe to retry".into(),
            )),
        }
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Register an identity (or update its display name).
    async fn provision(
        &self,
        identity_id: &str,
        display_name: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, "provision requested");
        let identity = self
            .bounded(
                self.engine
                    .provision(identity_id.to_string(), display_name.to_string()),
            )
            .await?;
        serde_json::to_string(&identity)
            .map_err(|err| zbus::fdo::Error::Failed(err.to_string()))
    }

    /// Enroll from pre-extracted embeddings (JSON array of
    /// `{values, extractor_version}` objects, in capture order).
    async fn enroll(
        &self,
        identity_id: &str,
        embeddings_json: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, "enroll requested");
        let embeddings: Vec<Embedding> = serde_json::from_str(embeddings_json)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("embeddings payload: {err}")))?;
        let samples = embeddings.into_iter().map(SampleInput::Embedding).collect();
        let outcome = self.bounded(self.engine.enroll(identity_id.to_string(), samples)).await?;
        Ok(enroll_response(&outcome))
    }

    /// Enroll from raw images; requires an extractor configured in the daemon.
    async fn enroll_images(
        &self,
        identity_id: &str,
        images: Vec<Vec<u8>>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, count = images.len(), "enroll from images requested");
        let samples = images.into_iter().map(SampleInput::Image).collect();
        let outcome = self.bounded(self.engine.enroll(identity_id.to_string(), samples)).await?;
        Ok(enroll_response(&outcome))
    }

    /// Verify one live embedding and record attendance on a match.
    async fn verify(
        &self,
        identity_id: &str,
        embedding_json: &str,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, "verify requested");
        let embedding: Embedding = serde_json::from_str(embedding_json)
            .map_err(|err| zbus::fdo::Error::InvalidArgs(format!("embedding payload: {err}")))?;
        let outcome = self
            .bounded(
                self.engine
                    .verify(identity_id.to_string(), SampleInput::Embedding(embedding)),
            )
            .await?;
        Ok(verify_response(&outcome))
    }

    /// Verify from a raw image; requires an extractor configured in the daemon.
    async fn verify_image(
        &self,
        identity_id: &str,
        image: Vec<u8>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(identity = identity_id, "verify from image requested");
        let outcome = self
            .bounded(
                self.engine
                    .verify(identity_id.to_string(), SampleInput::Image(image)),
            )
            .await?;
        Ok(verify_response(&outcome))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.status.db_path,
            "sealed_templates": self.status.sealed_templates,
            "match_threshold": self.status.match_threshold,
            "min_samples": self.status.min_samples,
            "cooldown": self.status.cooldown,
        })
        .to_string())
    }
}

fn enroll_response(outcome: &rollcall_core::EnrollOutcome) -> String {
    let samples: Vec<_> = outcome
        .samples
        .iter()
        .enumerate()
        .map(|(index, status)| match status {
            SampleStatus::Accepted => json!({ "index": index, "accepted": true }),
            SampleStatus::Rejected { similarity } => {
                json!({ "index": index, "accepted": false, "similarity": similarity })
            }
        })
        .collect();

    json!({
        "enrolled": true,
        "sample_count": outcome.template.sample_count(),
        "revision": outcome.revision,
        "samples": samples,
    })
    .to_string()
}

fn verify_response(outcome: &VerifyOutcome) -> String {
    let (already_recorded, record_id, recorded_at) = match &outcome.attendance {
        Some(RecordOutcome::Created(record)) => {
            (false, Some(record.id.clone()), Some(record.recorded_at.to_rfc3339()))
        }
        Some(RecordOutcome::AlreadyRecorded(record)) => {
            (true, Some(record.id.clone()), Some(record.recorded_at.to_rfc3339()))
        }
        None => (false, None, None),
    };

    json!({
        "matched": outcome.matched,
        "score": outcome.score,
        "already_recorded": already_recorded,
        "record_id": record_id,
        "recorded_at": recorded_at,
    })
    .to_string()
}
