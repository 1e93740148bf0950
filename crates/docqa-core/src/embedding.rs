//! Embedding collaborator trait, batching gateway, and vector utilities.
//!
//! [`Embedder`] is the text→vector contract implemented outside the core
//! (OpenAI-compatible HTTP, offline hashing, test fakes). The core never
//! talks to an embedder directly; it goes through [`EmbeddingGateway`],
//! which owns the batching policy and rejects partial or malformed output.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{CoreError, Result};

/// Converts texts into fixed-dimension vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Batching front door to an [`Embedder`].
#[derive(Clone)]
pub struct EmbeddingGateway {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl EmbeddingGateway {
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    /// Embed many texts, splitting them into batches of `batch_size`.
    ///
    /// Fails if any batch returns the wrong number of vectors, an empty
    /// vector, or vectors of differing dimension.
    pub async fn embed_all(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embedder.embed(batch).await?;
            if vectors.len() != batch.len() {
                return Err(CoreError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            out.extend(vectors);
        }
        validate_dimensions(&out)?;
        tracing::debug!(
            model = self.embedder.model_name(),
            texts = texts.len(),
            "embedded texts"
        );
        Ok(out)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_all(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::Embedding("empty embedding response".to_string()))
    }
}

fn validate_dimensions(vectors: &[Vec<f32>]) -> Result<()> {
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let dims = first.len();
    if dims == 0 {
        return Err(CoreError::Embedding("embedder returned an empty vector".to_string()));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(CoreError::Embedding(format!(
            "inconsistent vector dimensions: {} vs {}",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use docqa_core::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode little-endian f32 bytes back into a vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
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
