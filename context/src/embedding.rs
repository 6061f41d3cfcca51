use errors::{ContextError, ErrorKind, ProviderError};
use scribe_core::EmbeddingProvider;
use std::sync::{Arc, OnceLock};

/// Embedding front-end that enforces one dimensionality per deployment.
///
/// The expected dimension comes from the provider when it declares one,
/// otherwise from the first vector observed.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: Arc<OnceLock<usize>>
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimension = OnceLock::new();
        if let Some(declared) = provider.dimension() {
            let _ = dimension.set(declared);
        }
        Self {
            provider,
            dimension: Arc::new(dimension)
        }
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ContextError> {
        let vector = self.provider.embed(text).await?;
        if vector.is_empty() {
            return Err(ContextError::Embedding(ProviderError::new(
                ErrorKind::MalformedResponse,
                "embedding provider returned an empty vector"
            )));
        }

        let expected = *self.dimension.get_or_init(|| vector.len());
        if vector.len() != expected {
            return Err(ContextError::DimensionMismatch {
                expected,
                actual: vector.len()
            });
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::KeywordEmbeddingProvider;

    #[tokio::test]
    async fn test_dimension_fixed_by_first_vector() {
        let provider = KeywordEmbeddingProvider::new(["fog", "sea"])
            .with_vector("odd", vec![1.0, 0.0, 0.0, 0.0]);
        let embedder = Embedder::new(Arc::new(provider));
        assert_eq!(embedder.dimension(), None);

        let v = embedder.embed("fog over the sea").await.unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(embedder.dimension(), Some(3));

        let err = embedder.embed("odd").await.unwrap_err();
        assert_eq!(
            err,
            ContextError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        );
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let provider = KeywordEmbeddingProvider::new(["fog"]);
        provider.fail_with(ProviderError::quota("429"));
        let embedder = Embedder::new(Arc::new(provider));

        let err = embedder.embed("fog").await.unwrap_err();
        assert!(matches!(err, ContextError::Embedding(e) if e.kind == ErrorKind::QuotaExceeded));
    }
}
