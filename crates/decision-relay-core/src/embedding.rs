//! Embedding backend trait and vector utilities.
//!
//! Defines the [`EmbeddingBackend`] trait that semantic re-ranking and the
//! embedding backfill call through, plus pure helpers for vector storage
//! and similarity.
//!
//! Concrete backends (OpenAI) live in the `decision-relay` app crate.

use async_trait::async_trait;

use crate::error::Result;

/// A semantic backend that turns text into fixed-size vectors.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text through `backend`.
pub async fn embed_one(backend: &dyn EmbeddingBackend, text: &str) -> Result<Vec<f32>> {
    let mut vectors = backend.embed(&[text.to_string()]).await?;
    vectors
        .pop()
        .ok_or_else(|| crate::error::CoreError::Embedding("backend returned no vectors".into()))
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use decision_relay_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
