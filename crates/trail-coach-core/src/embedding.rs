//! Embedder trait and vector utilities.
//!
//! Defines the [`Embedder`] trait implemented by every sentence-embedding
//! backend, plus the pure helpers the index and retriever rely on:
//! - [`cosine_similarity`]: directional closeness of two vectors
//! - [`normalize_l2`]: scale a vector to unit length
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` byte encoding
//!   used by persistent cache backends
//!
//! Concrete backends (fastembed, Ollama) live in the `trail-coach` app crate.

use async_trait::async_trait;

use crate::error::Result;

/// A loaded sentence-embedding model.
///
/// Implementations must return L2-normalized vectors of exactly
/// [`dims`](Embedder::dims) components. Every stored and query vector in a
/// session comes from the same embedder, so the dimensionality is constant.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding dimensionality (e.g. `384`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, in input order.
    ///
    /// The default implementation calls [`embed`](Embedder::embed)
    /// sequentially. Backends with native batching should override it.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Encode a float vector as little-endian `f32` bytes (`len × 4` bytes).
///
/// ```rust
/// use trail_coach_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.25f32, -1.0, 3.5];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian `f32` bytes produced by [`vec_to_blob`].
///
/// Trailing bytes that do not form a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Scale `v` to unit length. Zero vectors are returned unchanged.
pub fn normalize_l2(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-9 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// Both vectors must have the same length; mixing dimensionalities is a
/// programming error and trips a debug assertion. Release builds return
/// `0.0` for mismatched, empty, or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "embedding dimensionality mismatch");
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_decode_ignores_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.5, -2.0]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![1.5, -2.0]);
    }

    #[test]
    fn normalize_produces_unit_length() {
        let v = normalize_l2(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        assert_eq!(normalize_l2(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_identical_is_one() {
        let v = vec![0.2, 0.4, 0.1];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite_is_minus_one() {
        assert!((cosine_similarity(&[0.0, 2.0], &[0.0, -1.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let a = [1.0, 1.0, 0.0];
        let b = [10.0, 10.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
