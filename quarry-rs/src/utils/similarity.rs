//! Vector similarity functions.

use ndarray::ArrayView1;

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty slices, mismatched lengths, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let a = ArrayView1::from(a);
    let b = ArrayView1::from(b);

    let dot = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Cosine similarity rescaled to a `[0.0, 1.0]` score.
///
/// Same mapping as the Neo4j cosine vector index (`(1 + cos) / 2`), so the
/// in-memory driver and the Neo4j driver agree on similarity floors.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    ((1.0 + cosine_similarity(a, b)) / 2.0).clamp(0.0, 1.0)
}

/// L2-normalize a vector. Zero and empty vectors are returned unchanged.
pub fn normalize_l2(v: &[f32]) -> Vec<f32> {
    let arr = ArrayView1::from(v);
    let norm = arr.dot(&arr).sqrt();

    if norm == 0.0 {
        return v.to_vec();
    }

    v.iter().map(|x| x / norm).collect()
}
