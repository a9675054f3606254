use crate::error::{Result, VectorStoreError};
use async_trait::async_trait;
use std::sync::Mutex;

/// Text → vector capability.
///
/// Implementations return one L2-normalized vector per input text, in order.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier recorded in checkpoints.
    fn model_name(&self) -> &str;

    fn dimension(&self) -> usize;
}

/// Deterministic offline embedder.
///
/// Vectors are seeded from a hash of the text, so equal texts always map to
/// equal vectors. Every call's batch size is recorded for inspection.
pub struct StubEmbedder {
    model_name: String,
    dimension: usize,
    batch_sizes: Mutex<Vec<usize>>,
}

impl StubEmbedder {
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Sizes of every `embed_batch` call so far, in call order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn batch_calls(&self) -> usize {
        self.batch_sizes().len()
    }
}

#[async_trait]
impl Embedder for StubEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_sizes
            .lock()
            .map_err(|_| VectorStoreError::EmbeddingError("stub call log poisoned".into()))?
            .push(texts.len());
        Ok(texts
            .iter()
            .map(|text| stub_embed(text, self.dimension))
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Scale `vec` to unit length in place; the zero vector is left unchanged.
pub fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(vec: &[f32]) -> f32 {
        vec.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn stub_is_deterministic_and_normalized() {
        let embedder = StubEmbedder::new("stub", 16);
        let texts = vec!["hello".to_string(), "world".to_string(), "hello".to_string()];
        let out = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0], out[2]);
        assert_ne!(out[0], out[1]);
        for vec in &out {
            assert_eq!(vec.len(), 16);
            assert!((norm(vec) - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn stub_records_batch_sizes() {
        let embedder = StubEmbedder::new("stub", 4);
        embedder
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        embedder.embed_batch(&["c".to_string()]).await.unwrap();
        assert_eq!(embedder.batch_sizes(), vec![2, 1]);
        assert_eq!(embedder.batch_calls(), 2);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut zero = vec![0.0_f32; 3];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0; 3]);

        let mut v = vec![3.0_f32, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
