//! Scoring a live embedding against an enrolled template.

use crate::types::{unit_score, Embedding, IncompatibleEmbedding, Template};

/// Default acceptance threshold on the [0, 1] score. The false-accept /
/// false-reject tradeoff is an operational decision; deployments tune this
/// through configuration rather than editing the constant.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.80;

/// How a multi-sample template is reduced to one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreAggregation {
    /// Best score against any individual enrolled sample. More permissive
    /// than the centroid and tolerates pose variation captured at
    /// enrollment.
    MaxSample,
    /// Score against the enrollment centroid only. One comparison per
    /// verification, stricter on off-center poses.
    Representative,
}

/// Decision policy for verification.
#[derive(Debug, Clone)]
pub struct MatchPolicy {
    /// Acceptance threshold on the [0, 1] score.
    pub threshold: f32,
    pub aggregation: ScoreAggregation,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            aggregation: ScoreAggregation::MaxSample,
        }
    }
}

/// Outcome of scoring one candidate against one template.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Similarity on the [0, 1] scale.
    pub score: f32,
    pub accepted: bool,
}

/// Strategy for scoring a candidate embedding against an enrolled template.
///
/// Implementations must be pure: no side effects, deterministic for
/// identical floating-point inputs.
pub trait Matcher {
    fn score(
        &self,
        candidate: &Embedding,
        template: &Template,
        policy: &MatchPolicy,
    ) -> Result<MatchResult, IncompatibleEmbedding>;
}

/// Cosine similarity matcher.
///
/// `MaxSample` aggregation always traverses every enrolled sample — no
/// early exit — so timing never leaks which sample matched.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn score(
        &self,
        candidate: &Embedding,
        template: &Template,
        policy: &MatchPolicy,
    ) -> Result<MatchResult, IncompatibleEmbedding> {
        template.representative.check_compatible(candidate)?;

        let score = match policy.aggregation {
            ScoreAggregation::MaxSample if !template.samples.is_empty() => {
                let mut best = f32::NEG_INFINITY;
                for sample in &template.samples {
                    let sim = unit_score(sample.cosine(candidate));
                    if sim > best {
                        best = sim;
                    }
                }
                best
            }
            _ => unit_score(template.representative.cosine(candidate)),
        };

        Ok(MatchResult {
            score,
            accepted: score >= policy.threshold,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec(), "test_v1")
    }

    fn template(samples: Vec<Embedding>) -> Template {
        let dim = samples[0].dimensionality();
        let mut sum = vec![0.0f32; dim];
        for s in &samples {
            for (acc, v) in sum.iter_mut().zip(&s.values) {
                *acc += v;
            }
        }
        let representative = Embedding::new(
            sum.into_iter().map(|v| v / samples.len() as f32).collect(),
            samples[0].extractor_version.clone(),
        );
        Template {
            identity_id: "u1".into(),
            samples,
            representative,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_self_similarity_is_maximal() {
        let a = emb(&[0.6, -0.8, 0.0]);
        let t = template(vec![a.clone()]);
        let result = CosineMatcher.score(&a, &t, &MatchPolicy::default()).unwrap();
        assert!((result.score - 1.0).abs() < 1e-6);
        assert!(result.accepted);
    }

    #[test]
    fn test_max_aggregation_picks_best_sample() {
        // Candidate aligns with the third sample only; the centroid of all
        // three points elsewhere.
        let t = template(vec![
            emb(&[0.0, 1.0, 0.0]),
            emb(&[0.0, 0.0, 1.0]),
            emb(&[1.0, 0.0, 0.0]),
        ]);
        let candidate = emb(&[1.0, 0.0, 0.0]);
        let result = CosineMatcher
            .score(&candidate, &t, &MatchPolicy::default())
            .unwrap();
        assert!((result.score - 1.0).abs() < 1e-6);
        assert!(result.accepted);
    }

    #[test]
    fn test_representative_aggregation_scores_centroid_only() {
        let t = template(vec![
            emb(&[0.0, 1.0, 0.0]),
            emb(&[0.0, 0.0, 1.0]),
            emb(&[1.0, 0.0, 0.0]),
        ]);
        let candidate = emb(&[1.0, 0.0, 0.0]);
        let policy = MatchPolicy {
            aggregation: ScoreAggregation::Representative,
            ..MatchPolicy::default()
        };
        let result = CosineMatcher.score(&candidate, &t, &policy).unwrap();
        // cos(candidate, centroid of the three axes) = 1/sqrt(3)
        assert!((result.score - 1.0 / 3.0f32.sqrt()).abs() < 1e-5);
        assert!(!result.accepted);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let t = template(vec![emb(&[1.0, 0.0])]);
        let candidate = emb(&[1.0, 0.0]);
        let policy = MatchPolicy {
            threshold: 1.0,
            ..MatchPolicy::default()
        };
        let result = CosineMatcher.score(&candidate, &t, &policy).unwrap();
        assert!(result.accepted);
    }

    #[test]
    fn test_below_threshold_rejected() {
        let t = template(vec![emb(&[1.0, 0.0])]);
        let candidate = emb(&[0.0, 1.0]);
        let result = CosineMatcher
            .score(&candidate, &t, &MatchPolicy::default())
            .unwrap();
        assert!(!result.accepted);
        assert!(result.score < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let t = template(vec![emb(&[1.0, 0.0])]);
        let candidate = emb(&[1.0, 0.0, 0.0]);
        let err = CosineMatcher
            .score(&candidate, &t, &MatchPolicy::default())
            .unwrap_err();
        assert_eq!(err.expected_dimensionality, 2);
        assert_eq!(err.found_dimensionality, 3);
    }

    #[test]
    fn test_extractor_version_mismatch_rejected() {
        let t = template(vec![emb(&[1.0, 0.0])]);
        let candidate = Embedding::new(vec![1.0, 0.0], "other_model");
        assert!(CosineMatcher
            .score(&candidate, &t, &MatchPolicy::default())
            .is_err());
    }
}
