//! Embedding seam for semantic matching.
//!
//! The engine never owns an embedding model. Deployments plug one in through
//! [`Embedder`]; embeddings are always computed before the write-commit step so
//! no store write waits on an embedding call.
//!
//! [`LexicalEmbedder`] is a deterministic, offline baseline using feature
//! hashing over tokens. It is *not* a neural embedding model, but it is stable
//! and sufficient for tests and embedded deployments.

use blake3::Hasher;
use thiserror::Error;

/// Default embedding dimensionality for lexical embeddings.
pub const DEFAULT_EMBEDDING_DIM: usize = 64;

/// Errors returned by an embedding backend.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The backend failed (network, model, quota...).
    #[error("embedding backend failed: {0}")]
    Backend(String),

    /// The backend returned a vector of unexpected shape.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        /// Dimensions the caller expected.
        expected: usize,
        /// Dimensions returned.
        actual: usize,
    },
}

/// Caller-supplied text embedding function.
///
/// Implementations that talk to a remote service are expected to enforce
/// their own timeouts; the engine treats any error as a hard failure.
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] when the backend cannot produce a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// A human-readable model name, used in logs.
    fn model_name(&self) -> &str {
        "unnamed"
    }
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty, zero-magnitude, or dimension-mismatched input.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let xf = f64::from(x);
        let yf = f64::from(y);
        dot += xf * yf;
        norm_a += xf * xf;
        norm_b += yf * yf;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        #[allow(clippy::cast_possible_truncation)]
        let sim = sim as f32;
        sim
    } else {
        0.0
    }
}

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Deterministic feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dim: usize,
}

impl LexicalEmbedder {
    /// Create an embedder with the given dimension (0 is bumped to 1).
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Dimension of produced vectors.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dim];
        let mut count = 0u32;

        for token in tokenize(&text.to_lowercase()) {
            let mut h = Hasher::new();
            h.update(token.as_bytes());
            let hash = h.finalize();
            let bytes = hash.as_bytes();

            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&bytes[..8]);
            let bucket = u64::from_le_bytes(bucket_bytes);

            #[allow(clippy::cast_possible_truncation)]
            let idx = (bucket % self.dim as u64) as usize;
            let sign = if (bytes[8] & 1) == 0 { 1.0f32 } else { -1.0f32 };
            vec[idx] += sign;
            count = count.saturating_add(1);
        }

        if count == 0 {
            return vec;
        }

        // L2-normalize.
        let norm2: f64 = vec.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
        if norm2 > 0.0 {
            #[allow(clippy::cast_possible_truncation)]
            let inv = norm2.sqrt().recip() as f32;
            for x in &mut vec {
                *x *= inv;
            }
        }

        vec
    }
}

impl Default for LexicalEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_EMBEDDING_DIM)
    }
}

impl Embedder for LexicalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_text(text))
    }

    fn model_name(&self) -> &str {
        "lexical-blake3"
    }
}
