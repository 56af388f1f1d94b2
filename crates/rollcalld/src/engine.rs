//! Engine thread: owns the store and the optional extractor, serializes
//! all matching and recording work behind an mpsc request channel.

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use rollcall_core::enroll::{enroll, EnrollError, EnrollOutcome, EnrollPolicy};
use rollcall_core::extractor::{ExtractionError, FeatureExtractor};
use rollcall_core::store::{StoreError, TemplateStore};
use rollcall_core::types::{Embedding, Identity, IncompatibleEmbedding};
use rollcall_core::{
    record_if_absent, CooldownPolicy, CosineMatcher, MatchPolicy, Matcher, RecordError,
    RecordOutcome,
};
use rollcall_store::SqliteStore;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("identity '{0}' has no enrolled template")]
    NotEnrolled(String),
    #[error("no feature extractor configured; submit pre-extracted embeddings")]
    ExtractorUnavailable,
    #[error("sample {index}: {source}")]
    Extraction {
        index: usize,
        #[source]
        source: ExtractionError,
    },
    #[error(transparent)]
    Incompatible(#[from] IncompatibleEmbedding),
    #[error(transparent)]
    Enroll(#[from] EnrollError),
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

impl EngineError {
    /// Caller-correctable input problems, as opposed to infrastructure
    /// failures worth retrying.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            EngineError::NotEnrolled(_)
                | EngineError::ExtractorUnavailable
                | EngineError::Extraction { .. }
                | EngineError::Incompatible(_)
                | EngineError::Enroll(EnrollError::InsufficientSamples { .. })
                | EngineError::Enroll(EnrollError::LowQualitySample { .. })
                | EngineError::Enroll(EnrollError::Incompatible(_))
                | EngineError::Store(StoreError::UnknownIdentity(_))
        )
    }
}

/// One face sample as supplied by the caller: an encoded image to run
/// through the configured extractor, or a pre-extracted embedding.
pub enum SampleInput {
    Image(Vec<u8>),
    Embedding(Embedding),
}

/// Result of a verification request.
#[derive(Debug)]
pub struct VerifyOutcome {
    pub score: f32,
    pub matched: bool,
    /// Present only on a match; says whether a new attendance row landed
    /// or an existing one inside the cooldown window was returned.
    pub attendance: Option<RecordOutcome>,
}

/// Policies the engine applies to every request.
pub struct EnginePolicies {
    pub matching: MatchPolicy,
    pub enrollment: EnrollPolicy,
    pub cooldown: CooldownPolicy,
}

enum EngineRequest {
    Provision {
        identity_id: String,
        display_name: String,
        reply: oneshot::Sender<Result<Identity, EngineError>>,
    },
    Enroll {
        identity_id: String,
        samples: Vec<SampleInput>,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Verify {
        identity_id: String,
        sample: SampleInput,
        reply: oneshot::Sender<Result<VerifyOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn provision(
        &self,
        identity_id: String,
        display_name: String,
    ) -> Result<Identity, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Provision {
                identity_id,
                display_name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request enrollment: resolve each sample to an embedding, gate, and
    /// commit a template.
    pub async fn enroll(
        &self,
        identity_id: String,
        samples: Vec<SampleInput>,
    ) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                identity_id,
                samples,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request verification: score one live sample and record attendance
    /// on an accepted match.
    pub async fn verify(
        &self,
        identity_id: String,
        sample: SampleInput,
    ) -> Result<VerifyOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Verify {
                identity_id,
                sample,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The store and extractor live on that thread for the daemon's lifetime;
/// every mutation they perform is a single transaction, so a caller that
/// gives up on a reply never leaves partial state behind.
pub fn spawn_engine(
    store: SqliteStore,
    extractor: Option<Box<dyn FeatureExtractor>>,
    policies: EnginePolicies,
) -> EngineHandle {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut store = store;
            let mut extractor = extractor;
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Provision {
                        identity_id,
                        display_name,
                        reply,
                    } => {
                        let result = store
                            .provision(&identity_id, &display_name)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Enroll {
                        identity_id,
                        samples,
                        reply,
                    } => {
                        let result = run_enroll(
                            &mut store,
                            &mut extractor,
                            &policies,
                            &identity_id,
                            samples,
                        );
                        let _ = reply.send(result);
                    }
                    EngineRequest::Verify {
                        identity_id,
                        sample,
                        reply,
                    } => {
                        let result = run_verify(
                            &mut store,
                            &mut extractor,
                            &policies,
                            &identity_id,
                            sample,
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    EngineHandle { tx }
}

fn resolve_sample(
    extractor: &mut Option<Box<dyn FeatureExtractor>>,
    index: usize,
    sample: SampleInput,
) -> Result<Embedding, EngineError> {
    match sample {
        SampleInput::Embedding(embedding) => Ok(embedding),
        SampleInput::Image(bytes) => {
            let extractor = extractor
                .as_mut()
                .ok_or(EngineError::ExtractorUnavailable)?;
            extractor
                .extract(&bytes)
                .map_err(|source| EngineError::Extraction { index, source })
        }
    }
}

fn run_enroll(
    store: &mut SqliteStore,
    extractor: &mut Option<Box<dyn FeatureExtractor>>,
    policies: &EnginePolicies,
    identity_id: &str,
    samples: Vec<SampleInput>,
) -> Result<EnrollOutcome, EngineError> {
    let mut embeddings = Vec::with_capacity(samples.len());
    for (index, sample) in samples.into_iter().enumerate() {
        embeddings.push(resolve_sample(extractor, index, sample)?);
    }

    tracing::debug!(
        identity = identity_id,
        samples = embeddings.len(),
        "enroll: samples resolved"
    );
    Ok(enroll(store, identity_id, &embeddings, &policies.enrollment)?)
}

fn run_verify(
    store: &mut SqliteStore,
    extractor: &mut Option<Box<dyn FeatureExtractor>>,
    policies: &EnginePolicies,
    identity_id: &str,
    sample: SampleInput,
) -> Result<VerifyOutcome, EngineError> {
    let embedding = resolve_sample(extractor, 0, sample)?;

    let stored = store
        .get(identity_id)?
        .ok_or_else(|| EngineError::NotEnrolled(identity_id.to_string()))?;

    let decision = CosineMatcher.score(&embedding, &stored.template, &policies.matching)?;
    if !decision.accepted {
        tracing::info!(
            identity = identity_id,
            score = decision.score,
            "verify: rejected"
        );
        return Ok(VerifyOutcome {
            score: decision.score,
            matched: false,
            attendance: None,
        });
    }

    let attendance =
        record_if_absent(store, identity_id, &decision, Utc::now(), &policies.cooldown)?;
    tracing::info!(
        identity = identity_id,
        score = decision.score,
        new_record = attendance.is_new(),
        "verify: accepted"
    );
    Ok(VerifyOutcome {
        score: decision.score,
        matched: true,
        attendance: Some(attendance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    const DIM: usize = 4;

    /// Extractor double that hands out a scripted sequence of embeddings.
    struct ScriptedExtractor {
        queue: VecDeque<Vec<f32>>,
    }

    impl ScriptedExtractor {
        fn new(embeddings: Vec<Vec<f32>>) -> Box<dyn FeatureExtractor> {
            Box::new(Self {
                queue: embeddings.into_iter().collect(),
            })
        }
    }

    impl FeatureExtractor for ScriptedExtractor {
        fn dimensionality(&self) -> usize {
            DIM
        }

        fn version(&self) -> &str {
            "stub_v1"
        }

        fn extract(&mut self, _image: &[u8]) -> Result<Embedding, ExtractionError> {
            self.queue
                .pop_front()
                .map(|values| Embedding::new(values, "stub_v1"))
                .ok_or(ExtractionError::NoFaceDetected)
        }
    }

    fn policies() -> EnginePolicies {
        EnginePolicies {
            matching: MatchPolicy::default(),
            enrollment: EnrollPolicy {
                min_samples: 3,
                ..EnrollPolicy::default()
            },
            cooldown: CooldownPolicy::default(),
        }
    }

    fn store_with_identity() -> SqliteStore {
        let mut store = SqliteStore::open_in_memory(None).unwrap();
        store.provision("u1", "Ana").unwrap();
        store
    }

    fn sample(values: &[f32]) -> SampleInput {
        SampleInput::Embedding(Embedding::new(values.to_vec(), "stub_v1"))
    }

    fn enrollment_inputs() -> Vec<SampleInput> {
        vec![
            sample(&[1.0, 0.02, 0.0, 0.0]),
            sample(&[0.98, 0.0, 0.03, 0.0]),
            sample(&[1.01, 0.01, 0.0, 0.02]),
        ]
    }

    #[tokio::test]
    async fn enroll_then_verify_records_attendance_once() {
        let engine = spawn_engine(store_with_identity(), None, policies());

        let outcome = engine
            .enroll("u1".into(), enrollment_inputs())
            .await
            .unwrap();
        assert_eq!(outcome.template.sample_count(), 3);

        let verify = engine
            .verify("u1".into(), sample(&[1.0, 0.02, 0.0, 0.0]))
            .await
            .unwrap();
        assert!(verify.matched);
        assert!(verify.attendance.as_ref().unwrap().is_new());

        // Immediate replay inside the same calendar day dedups.
        let replay = engine
            .verify("u1".into(), sample(&[1.0, 0.02, 0.0, 0.0]))
            .await
            .unwrap();
        assert!(replay.matched);
        assert!(!replay.attendance.as_ref().unwrap().is_new());
    }

    #[tokio::test]
    async fn mismatched_face_is_rejected_without_a_record() {
        let engine = spawn_engine(store_with_identity(), None, policies());
        engine
            .enroll("u1".into(), enrollment_inputs())
            .await
            .unwrap();

        let verify = engine
            .verify("u1".into(), sample(&[0.0, 0.0, 1.0, 0.0]))
            .await
            .unwrap();
        assert!(!verify.matched);
        assert!(verify.attendance.is_none());
    }

    #[tokio::test]
    async fn verify_without_template_reports_not_enrolled() {
        let engine = spawn_engine(store_with_identity(), None, policies());
        let err = engine
            .verify("u1".into(), sample(&[1.0, 0.0, 0.0, 0.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotEnrolled(_)));
        assert!(err.is_input_error());
    }

    #[tokio::test]
    async fn image_samples_require_an_extractor() {
        let engine = spawn_engine(store_with_identity(), None, policies());
        let err = engine
            .verify("u1".into(), SampleInput::Image(vec![0u8; 16]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExtractorUnavailable));
    }

    #[tokio::test]
    async fn image_samples_go_through_the_extractor() {
        let extractor = ScriptedExtractor::new(vec![
            vec![1.0, 0.02, 0.0, 0.0],
            vec![0.98, 0.0, 0.03, 0.0],
            vec![1.01, 0.01, 0.0, 0.02],
            vec![1.0, 0.01, 0.01, 0.0],
        ]);
        let engine = spawn_engine(store_with_identity(), Some(extractor), policies());

        let images: Vec<SampleInput> = (0..3)
            .map(|_| SampleInput::Image(vec![0u8; 16]))
            .collect();
        let outcome = engine.enroll("u1".into(), images).await.unwrap();
        assert_eq!(outcome.template.sample_count(), 3);

        let verify = engine
            .verify("u1".into(), SampleInput::Image(vec![0u8; 16]))
            .await
            .unwrap();
        assert!(verify.matched);
    }

    #[tokio::test]
    async fn extraction_failure_names_the_offending_sample() {
        // Only two scripted embeddings for three images: the third fails.
        let extractor = ScriptedExtractor::new(vec![
            vec![1.0, 0.02, 0.0, 0.0],
            vec![0.98, 0.0, 0.03, 0.0],
        ]);
        let engine = spawn_engine(store_with_identity(), Some(extractor), policies());

        let images: Vec<SampleInput> = (0..3)
            .map(|_| SampleInput::Image(vec![0u8; 16]))
            .collect();
        let err = engine.enroll("u1".into(), images).await.unwrap_err();
        match err {
            EngineError::Extraction { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn provision_round_trips_through_the_engine() {
        let engine = spawn_engine(
            SqliteStore::open_in_memory(None).unwrap(),
            None,
            policies(),
        );
        let identity = engine
            .provision("u2".into(), "Budi Santoso".into())
            .await
            .unwrap();
        assert_eq!(identity.id, "u2");
        assert_eq!(
            identity.status,
            rollcall_core::EnrollmentStatus::Unenrolled
        );
    }
}
