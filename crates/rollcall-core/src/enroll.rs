//! Enrollment coordination: sample quality gating and atomic template commit.

use chrono::Utc;
use thiserror::Error;

use crate::store::{StoreError, TemplateStore};
use crate::types::{cosine_between, unit_score, Embedding, IncompatibleEmbedding, Template};

pub const DEFAULT_MIN_SAMPLES: usize = 5;

/// Default floor for the self-consistency gate, on the [0, 1] score scale.
/// Looser than the match threshold: enrollment poses intentionally vary.
pub const DEFAULT_MIN_SAMPLE_SIMILARITY: f32 = 0.60;

#[derive(Debug, Clone)]
pub struct EnrollPolicy {
    /// Minimum number of quality-accepted samples a template requires.
    pub min_samples: usize,
    /// Floor on each sample's similarity to the running centroid of the
    /// samples accepted before it.
    pub min_sample_similarity: f32,
}

impl Default for EnrollPolicy {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
            min_sample_similarity: DEFAULT_MIN_SAMPLE_SIMILARITY,
        }
    }
}

/// Per-sample verdict from the quality gate, in submission order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleStatus {
    Accepted,
    /// Failed the self-consistency gate — likely a different subject or a
    /// degenerate frame. Excluded from the centroid and the template.
    Rejected { similarity: f32 },
}

#[derive(Debug)]
pub struct EnrollOutcome {
    pub template: Template,
    /// Store revision the template committed at.
    pub revision: i64,
    /// One status per submitted sample, so the capture flow can re-prompt
    /// the exact poses that failed.
    pub samples: Vec<SampleStatus>,
}

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("need at least {required} samples, got {provided}")]
    InsufficientSamples { provided: usize, required: usize },
    #[error(
        "sample {index} failed the self-consistency gate \
         (similarity {similarity:.3} below required {required:.3})"
    )]
    LowQualitySample {
        index: usize,
        similarity: f32,
        required: f32,
    },
    #[error(transparent)]
    Incompatible(#[from] IncompatibleEmbedding),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Gate `samples` and commit a new template for `identity_id`.
///
/// The first sample seeds the running centroid; each later sample must
/// score at least `policy.min_sample_similarity` against the centroid of
/// the samples accepted before it. Rejected samples are skipped, and
/// enrollment still succeeds when at least `policy.min_samples` survive.
///
/// The commit is a compare-and-swap keyed on the revision observed before
/// gating. A conflict (concurrent enrollment) is retried once with a fresh
/// read; the prior template stays valid until the replace lands, so the
/// identity is never left unverifiable mid-enrollment.
pub fn enroll<S: TemplateStore>(
    store: &mut S,
    identity_id: &str,
    samples: &[Embedding],
    policy: &EnrollPolicy,
) -> Result<EnrollOutcome, EnrollError> {
    if samples.len() < policy.min_samples {
        return Err(EnrollError::InsufficientSamples {
            provided: samples.len(),
            required: policy.min_samples,
        });
    }

    let first = &samples[0];
    for sample in &samples[1..] {
        first.check_compatible(sample)?;
    }

    let prior = store.get(identity_id)?;
    let expected_revision = prior.as_ref().map(|stored| stored.revision);

    let dim = first.dimensionality();
    let mut sum = vec![0.0f32; dim];
    let mut accepted: Vec<usize> = Vec::with_capacity(samples.len());
    let mut statuses = Vec::with_capacity(samples.len());

    for (index, sample) in samples.iter().enumerate() {
        if accepted.is_empty() {
            add_into(&mut sum, &sample.values);
            accepted.push(index);
            statuses.push(SampleStatus::Accepted);
            continue;
        }

        let centroid = mean_of(&sum, accepted.len());
        let similarity = unit_score(cosine_between(&sample.values, &centroid));
        if similarity < policy.min_sample_similarity {
            tracing::debug!(
                identity = identity_id,
                index,
                similarity,
                "enrollment sample rejected by self-consistency gate"
            );
            statuses.push(SampleStatus::Rejected { similarity });
            continue;
        }

        add_into(&mut sum, &sample.values);
        accepted.push(index);
        statuses.push(SampleStatus::Accepted);
    }

    if accepted.len() < policy.min_samples {
        let (index, similarity) = statuses
            .iter()
            .enumerate()
            .find_map(|(i, status)| match status {
                SampleStatus::Rejected { similarity } => Some((i, *similarity)),
                SampleStatus::Accepted => None,
            })
            .expect("fewer accepted than submitted implies a rejection");
        return Err(EnrollError::LowQualitySample {
            index,
            similarity,
            required: policy.min_sample_similarity,
        });
    }

    let representative = Embedding::new(
        mean_of(&sum, accepted.len()),
        first.extractor_version.clone(),
    );
    let template = Template {
        identity_id: identity_id.to_string(),
        samples: accepted.iter().map(|&i| samples[i].clone()).collect(),
        representative,
        created_at: Utc::now(),
    };

    let revision = match store.replace(identity_id, &template, expected_revision) {
        Ok(revision) => revision,
        Err(StoreError::Conflict { .. }) => {
            // A concurrent enrollment moved the revision between our read
            // and the replace. Re-read once and retry; a second conflict
            // surfaces to the caller.
            let fresh = store.get(identity_id)?;
            let expected = fresh.as_ref().map(|stored| stored.revision);
            store.replace(identity_id, &template, expected)?
        }
        Err(other) => return Err(other.into()),
    };

    tracing::info!(
        identity = identity_id,
        samples = template.sample_count(),
        rejected = statuses.len() - accepted.len(),
        revision,
        "template committed"
    );

    Ok(EnrollOutcome {
        template,
        revision,
        samples: statuses,
    })
}

fn add_into(sum: &mut [f32], values: &[f32]) {
    for (acc, v) in sum.iter_mut().zip(values) {
        *acc += v;
    }
}

fn mean_of(sum: &[f32], count: usize) -> Vec<f32> {
    sum.iter().map(|v| v / count as f32).collect()
}
