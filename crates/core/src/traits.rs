use crate::error::BackendError;
use async_trait::async_trait;

/// Maps texts to fixed-length vectors. One implementation is chosen per process
/// and must be the same one that built the index being queried.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifies the vector space, e.g. `remote:text-embedding-3-small`.
    fn model_id(&self) -> String;

    /// Returns one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| BackendError::CountMismatch {
            backend: self.model_id(),
            expected: 1,
            actual: 0,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.0,
        }
    }
}

/// Produces answer text for an assembled prompt. Implementations return only
/// newly generated text, never an echo of the prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_id(&self) -> String;

    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, BackendError>;
}
