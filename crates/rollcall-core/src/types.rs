use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raised when two embeddings cannot be compared: either they differ in
/// dimensionality or they were produced by different extractor versions.
/// Scores across extractor versions are meaningless, so this is never
/// papered over with truncation or padding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "incompatible embedding: expected {expected_dimensionality} values from extractor \
     '{expected_version}', got {found_dimensionality} values from '{found_version}'"
)]
pub struct IncompatibleEmbedding {
    pub expected_dimensionality: usize,
    pub found_dimensionality: usize,
    pub expected_version: String,
    pub found_version: String,
}

/// Face embedding vector with provenance.
///
/// Dimensionality is fixed by the extractor that produced the vector
/// (e.g. 128 for SFace, 512 for ArcFace) and is carried implicitly as
/// `values.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Extractor model version that produced this embedding (e.g. "sface_2021dec").
    pub extractor_version: String,
}

/// Cosine similarity between two raw vectors, in [-1, 1].
///
/// Constant-time over all dimensions: always processes the full vector,
/// no early exit on mismatched magnitudes.
pub fn cosine_between(lhs: &[f32], rhs: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_lhs = 0.0f32;
    let mut norm_rhs = 0.0f32;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    let denom = norm_lhs.sqrt() * norm_rhs.sqrt();
    if denom > 0.0 { dot / denom } else { 0.0 }
}

/// Map a raw cosine onto the [0, 1] score scale.
///
/// Negative correlation carries no extra meaning for face embeddings, so
/// anything at or below orthogonal clamps to 0 and identical direction
/// scores 1. Uncorrelated vectors land near 0 rather than mid-scale.
pub fn unit_score(cosine: f32) -> f32 {
    cosine.clamp(0.0, 1.0)
}

impl Embedding {
    pub fn new(values: Vec<f32>, extractor_version: impl Into<String>) -> Self {
        Self {
            values,
            extractor_version: extractor_version.into(),
        }
    }

    pub fn dimensionality(&self) -> usize {
        self.values.len()
    }

    /// Raw cosine similarity in [-1, 1]. Higher = more similar.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        cosine_between(&self.values, &other.values)
    }

    /// Similarity on the [0, 1] score scale used by every decision policy.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        unit_score(self.cosine(other))
    }

    /// Fail unless `other` has the same dimensionality and extractor version.
    pub fn check_compatible(&self, other: &Embedding) -> Result<(), IncompatibleEmbedding> {
        if self.dimensionality() != other.dimensionality()
            || self.extractor_version != other.extractor_version
        {
            return Err(IncompatibleEmbedding {
                expected_dimensionality: self.dimensionality(),
                found_dimensionality: other.dimensionality(),
                expected_version: self.extractor_version.clone(),
                found_version: other.extractor_version.clone(),
            });
        }
        Ok(())
    }
}

/// Whether an identity has a committed template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Unenrolled,
    Enrolled,
}

/// A subject known to the organization. Provisioned out of band; the
/// status transitions to `Enrolled` only via a committed template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    pub status: EnrollmentStatus,
}

/// The committed, enrolled representation of one identity.
///
/// Holds every sample accepted at enrollment plus their centroid. Replaced
/// wholesale by re-enrollment; never mutated sample-by-sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub identity_id: String,
    /// Accepted enrollment samples, in capture order.
    pub samples: Vec<Embedding>,
    /// Centroid of the accepted samples.
    pub representative: Embedding,
    pub created_at: DateTime<Utc>,
}

impl Template {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn dimensionality(&self) -> usize {
        self.representative.dimensionality()
    }

    pub fn extractor_version(&self) -> &str {
        &self.representative.extractor_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), "test_v1")
    }

    #[test]
    fn test_cosine_identical() {
        let a = emb(&[1.0, 0.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        assert!((a.cosine(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.cosine(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[-1.0, 0.0]);
        assert!((a.cosine(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector() {
        let a = emb(&[0.0, 0.0]);
        let b = emb(&[1.0, 0.0]);
        assert_eq!(a.cosine(&b), 0.0);
    }

    #[test]
    fn test_similarity_invariant_under_positive_scaling() {
        let a = emb(&[0.3, -0.2, 0.9]);
        let scaled = emb(&[0.3 * 2.5, -0.2 * 2.5, 0.9 * 2.5]);
        assert!((a.similarity(&scaled) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_clamps_negative_cosine_to_zero() {
        let a = emb(&[1.0, 0.0]);
        let negated = emb(&[-1.0, 0.0]);
        assert_eq!(a.similarity(&negated), 0.0);
    }

    #[test]
    fn test_compatible_same_shape_and_version() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[0.0, 1.0]);
        assert!(a.check_compatible(&b).is_ok());
    }

    #[test]
    fn test_incompatible_dimensionality() {
        let a = emb(&[1.0, 0.0]);
        let b = emb(&[1.0, 0.0, 0.0]);
        let err = a.check_compatible(&b).unwrap_err();
        assert_eq!(err.expected_dimensionality, 2);
        assert_eq!(err.found_dimensionality, 3);
    }

    #[test]
    fn test_incompatible_extractor_version() {
        let a = Embedding::new(vec![1.0, 0.0], "sface_2021dec");
        let b = Embedding::new(vec![1.0, 0.0], "w600k_r50");
        let err = a.check_compatible(&b).unwrap_err();
        assert_eq!(err.expected_version, "sface_2021dec");
        assert_eq!(err.found_version, "w600k_r50");
    }
}
