use async_trait::async_trait;

use crate::error::Result;

/// Turns text into a fixed-length vector.
///
/// Implementations must be deterministic for a given model and input, and
/// return vectors of the same length for every call.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts one after another.
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Returns `false` once the provider has been disabled.
    fn is_available(&self) -> bool {
        true
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Dot product of two equal-length vectors, `None` if the lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Constant;

    #[async_trait]
    impl Embedder for Constant {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[test]
    fn normalize_produces_unit_length() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0, 0.0, 0.0];
        normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn dot_of_normalized_is_cosine() {
        let mut a = vec![1.0, 1.0];
        let mut b = vec![2.0, 2.0];
        normalize(&mut a);
        normalize(&mut b);
        assert!((dot(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dot_rejects_length_mismatch() {
        assert_eq!(dot(&[1.0], &[1.0, 2.0]), None);
    }

    #[tokio::test]
    async fn embed_many_preserves_order() {
        let texts = vec!["a".to_string(), "abc".to_string()];
        let vectors = Constant.embed_many(&texts).await.unwrap();
        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }
}
