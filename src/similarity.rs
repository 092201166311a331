//! Vector similarity used by retrieval ranking.

/// Cosine similarity between two vectors.
///
/// Vectors of different lengths are compared over their shared prefix, with
/// the norms taken over that prefix as well; this keeps scoring total when a
/// configuration change alters the embedding dimensionality mid-corpus.
/// Degenerate input (an empty prefix or a near-zero norm) scores `0.0`
/// rather than propagating a NaN into the ranking.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for i in 0..n {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let mag_a = norm_a.sqrt();
    let mag_b = norm_b.sqrt();
    if mag_a <= f32::EPSILON || mag_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}
