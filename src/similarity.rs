/**
 * Similarity Engine
 * Cosine similarity between face embeddings and the threshold decision
 */

use serde::Serialize;

use crate::embedding::FaceEmbedding;
use crate::error::{KycError, Result};

pub const DEFAULT_THRESHOLD_PERCENT: f64 = 75.0;

/// Match threshold in percent; a comparison matches when `percentage >= threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MatchThreshold(f64);

impl MatchThreshold {
    pub fn new(percent: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(KycError::Config(format!(
                "match threshold must lie in [0, 100], got {}",
                percent
            )));
        }
        Ok(Self(percent))
    }

    pub fn percent(&self) -> f64 {
        self.0
    }

    pub fn accepts(&self, percentage: f64) -> bool {
        percentage >= self.0
    }
}

impl Default for MatchThreshold {
    fn default() -> Self {
        Self(DEFAULT_THRESHOLD_PERCENT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub similarity: f64,
    pub percentage: f64,
    pub threshold: f64,
    pub is_match: bool,
}

impl SimilarityResult {
    pub fn from_similarity(similarity: f64, threshold: MatchThreshold) -> Self {
        let percentage = similarity_to_percent(similarity);
        Self {
            similarity,
            percentage,
            threshold: threshold.percent(),
            is_match: threshold.accepts(percentage),
        }
    }
}

/// Scales a vector to unit L2 norm. The zero vector is returned unchanged.
pub fn l2_normalize(v: &[f32]) -> Vec<f64> {
    let norm = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.iter().map(|x| f64::from(*x)).collect();
    }
    v.iter().map(|x| f64::from(*x) / norm).collect()
}

/// Cosine of the angle between `a` and `b`, in [-1, 1].
///
/// Both slices must have the same length; `compare` checks this for embeddings.
/// A zero vector has no direction and therefore scores 0 against anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let a = l2_normalize(a);
    let b = l2_normalize(b);
    let dot: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    dot.clamp(-1.0, 1.0)
}

/// Linear remap of [-1, 1] onto [0, 100].
pub fn similarity_to_percent(similarity: f64) -> f64 {
    (similarity + 1.0) / 2.0 * 100.0
}

/// Compares two embeddings produced by the same model.
pub fn compare(a: &FaceEmbedding, b: &FaceEmbedding, threshold: MatchThreshold) -> Result<SimilarityResult> {
    if a.model() != b.model() {
        return Err(KycError::ModelMismatch {
            left: a.model().to_string(),
            right: b.model().to_string(),
        });
    }
    if a.dimension() != b.dimension() {
        return Err(KycError::DimensionMismatch {
            left: a.dimension(),
            right: b.dimension(),
        });
    }
    Ok(SimilarityResult::from_similarity(
        cosine_similarity(a.vector(), b.vector()),
        threshold,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn embedding(vector: &[f32]) -> FaceEmbedding {
        FaceEmbedding::new("Facenet", vector.to_vec()).unwrap()
    }

    #[test]
    fn self_similarity_is_one() {
        for v in [vec![0.3f32, -1.7, 2.2, 0.01], vec![5.0], vec![1e-3, 1e-3, 1e-3]] {
            assert!((cosine_similarity(&v, &v) - 1.0).abs() < EPS, "{:?}", v);
        }
    }

    #[test]
    fn percent_mapping_endpoints() {
        assert_eq!(similarity_to_percent(-1.0), 0.0);
        assert_eq!(similarity_to_percent(0.0), 50.0);
        assert_eq!(similarity_to_percent(1.0), 100.0);
    }

    #[test]
    fn magnitude_does_not_matter() {
        let s = cosine_similarity(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0]);
        assert!((s - 1.0).abs() < EPS);
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < EPS);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
    }

    #[test]
    fn zero_vector_passes_through_unnormalized() {
        assert_eq!(l2_normalize(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        let s = cosine_similarity(&[0.0, 0.0], &[0.6, 0.8]);
        assert_eq!(s, 0.0);
        assert_eq!(similarity_to_percent(s), 50.0);
    }

    #[test]
    fn threshold_is_inclusive() {
        let threshold = MatchThreshold::default();
        let at = SimilarityResult::from_similarity(0.5, threshold);
        assert_eq!(at.percentage, 75.0);
        assert!(at.is_match);

        let below = SimilarityResult::from_similarity(0.4999, threshold);
        assert!(!below.is_match);
    }

    #[test]
    fn threshold_must_be_a_percentage() {
        assert!(MatchThreshold::new(-0.1).is_err());
        assert!(MatchThreshold::new(100.1).is_err());
        assert!(MatchThreshold::new(f64::NAN).is_err());
        assert_eq!(MatchThreshold::new(80.0).unwrap().percent(), 80.0);
    }

    #[test]
    fn embeddings_from_different_models_are_not_compared() {
        let a = embedding(&[1.0, 0.0]);
        let b = FaceEmbedding::new("ArcFace", vec![1.0, 0.0]).unwrap();
        assert!(matches!(
            compare(&a, &b, MatchThreshold::default()),
            Err(KycError::ModelMismatch { .. })
        ));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let a = embedding(&[1.0, 0.0]);
        let b = embedding(&[1.0, 0.0, 0.0]);
        assert!(matches!(
            compare(&a, &b, MatchThreshold::default()),
            Err(KycError::DimensionMismatch { left: 2, right: 3 })
        ));
    }
}
