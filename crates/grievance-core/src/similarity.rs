//! Embedding similarity and geo-gated duplicate ranking.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Coordinates, GrievanceId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DuplicatePolicy {
    /// Minimum similarity (exclusive) for a candidate to be listed as similar.
    pub similarity_threshold: f64,
    /// Minimum similarity (exclusive) for the top candidate to become `duplicate_of`.
    pub duplicate_threshold: f64,
    /// Half-width of the lat/lng box, in degrees (~5 km).
    pub geo_box_degrees: f64,
    pub max_results: usize,
    pub candidate_window_days: i64,
    pub candidate_limit: usize,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            duplicate_threshold: 0.90,
            geo_box_degrees: 0.045,
            max_results: 5,
            candidate_window_days: 30,
            candidate_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateCandidate {
    pub id: GrievanceId,
    pub embedding: Vec<f32>,
    pub location: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SimilarGrievance {
    pub id: GrievanceId,
    pub similarity: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DuplicateAssessment {
    pub similar: Vec<SimilarGrievance>,
    pub duplicate_of: Option<GrievanceId>,
}

/// Cosine similarity; `0.0` for empty, mismatched, or zero-norm vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a > 0.0 && norm_b > 0.0 {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    } else {
        0.0
    }
}

/// The geo-gate only applies when both sides carry coordinates.
#[must_use]
pub fn passes_geo_gate(a: Option<Coordinates>, b: Option<Coordinates>, box_degrees: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a.lat - b.lat).abs() < box_degrees && (a.lng - b.lng).abs() < box_degrees,
        _ => true,
    }
}

/// Rank candidates against a new grievance's embedding and location.
///
/// The link is single-target: chains of near-duplicates are not resolved into
/// clusters.
#[must_use]
pub fn assess_duplicates(
    embedding: &[f32],
    location: Option<Coordinates>,
    candidates: &[DuplicateCandidate],
    policy: &DuplicatePolicy,
) -> DuplicateAssessment {
    if embedding.is_empty() {
        return DuplicateAssessment::default();
    }

    let mut similar: Vec<SimilarGrievance> = candidates
        .iter()
        .filter(|candidate| passes_geo_gate(location, candidate.location, policy.geo_box_degrees))
        .map(|candidate| SimilarGrievance {
            id: candidate.id,
            similarity: cosine_similarity(embedding, &candidate.embedding),
        })
        .filter(|scored| scored.similarity > policy.similarity_threshold)
        .collect();

    similar.sort_by(|lhs, rhs| {
        rhs.similarity
            .partial_cmp(&lhs.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| lhs.id.cmp(&rhs.id))
    });
    similar.truncate(policy.max_results);

    let duplicate_of = similar
        .first()
        .filter(|top| top.similarity > policy.duplicate_threshold)
        .map(|top| top.id);

    DuplicateAssessment { similar, duplicate_of }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 0.95 cosine against [1, 0].
    fn near_copy() -> Vec<f32> {
        vec![0.95, 0.312_249_9]
    }

    fn candidate(embedding: Vec<f32>, location: Option<Coordinates>) -> DuplicateCandidate {
        DuplicateCandidate { id: GrievanceId::new(), embedding, location }
    }

    #[test]
    fn identical_vectors_have_unit_similarity() {
        let v = [0.3_f32, -1.2, 4.0, 0.01];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_vectors_have_zero_similarity() {
        assert!(cosine_similarity(&[], &[]).abs() < f64::EPSILON);
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0]).abs() < f64::EPSILON);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn orthogonal_and_opposite_vectors() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn nearby_near_copy_is_flagged_as_duplicate() {
        let origin = Coordinates { lat: 12.9716, lng: 77.5946 };
        // ~4 km north
        let nearby = Coordinates { lat: 12.9716 + 0.036, lng: 77.5946 };
        let existing = candidate(near_copy(), Some(nearby));
        let existing_id = existing.id;

        let assessment =
            assess_duplicates(&[1.0, 0.0], Some(origin), &[existing], &DuplicatePolicy::default());
        assert_eq!(assessment.duplicate_of, Some(existing_id));
        assert_eq!(assessment.similar.len(), 1);
        assert!((assessment.similar[0].similarity - 0.95).abs() < 1e-6);
    }

    #[test]
    fn distant_near_copy_fails_the_geo_gate() {
        let origin = Coordinates { lat: 12.9716, lng: 77.5946 };
        // ~10 km north
        let distant = Coordinates { lat: 12.9716 + 0.09, lng: 77.5946 };
        let assessment = assess_duplicates(
            &[1.0, 0.0],
            Some(origin),
            &[candidate(near_copy(), Some(distant))],
            &DuplicatePolicy::default(),
        );
        assert_eq!(assessment, DuplicateAssessment::default());
    }

    #[test]
    fn geo_gate_is_skipped_when_either_side_lacks_coordinates() {
        let far = Coordinates { lat: 40.0, lng: -70.0 };
        assert!(passes_geo_gate(None, Some(far), 0.045));
        assert!(passes_geo_gate(Some(far), None, 0.045));
        assert!(passes_geo_gate(None, None, 0.045));

        let assessment = assess_duplicates(
            &[1.0, 0.0],
            None,
            &[candidate(near_copy(), Some(far))],
            &DuplicatePolicy::default(),
        );
        assert!(assessment.duplicate_of.is_some());
    }

    #[test]
    fn similar_but_not_duplicate_between_thresholds() {
        // cos = 0.8
        let assessment = assess_duplicates(
            &[1.0, 0.0],
            None,
            &[candidate(vec![0.8, 0.6], None)],
            &DuplicatePolicy::default(),
        );
        assert_eq!(assessment.similar.len(), 1);
        assert_eq!(assessment.duplicate_of, None);
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let mut candidates = Vec::new();
        for step in 0..8_u8 {
            let y = 0.05 * f32::from(step);
            candidates.push(candidate(vec![1.0, y], None));
        }
        let assessment =
            assess_duplicates(&[1.0, 0.0], None, &candidates, &DuplicatePolicy::default());
        assert_eq!(assessment.similar.len(), 5);
        for pair in assessment.similar.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
        assert_eq!(assessment.duplicate_of, Some(candidates[0].id));
    }

    #[test]
    fn empty_embedding_short_circuits() {
        let assessment = assess_duplicates(
            &[],
            None,
            &[candidate(vec![1.0, 0.0], None)],
            &DuplicatePolicy::default(),
        );
        assert_eq!(assessment, DuplicateAssessment::default());
    }
}
