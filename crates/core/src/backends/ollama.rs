//! Models resident in a local Ollama daemon.
//!
//! `/api/generate` answers with the newly generated text only, so the prompt
//! never has to be cut out of the decoded output.

use super::{
    endpoint, ensure_inputs, finish_batch, http_client, parse_vector, post_json, EMBED_BATCH_SIZE,
};
use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::retry::with_backoff;
use crate::traits::{Embedder, GenerationParams, Generator};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

const BACKEND: &str = "ollama";
const KEEP_ALIVE: &str = "30m";

pub struct OllamaBackend {
    client: Client,
    config: BackendConfig,
}

impl OllamaBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }
}

fn parse_embed_response(payload: &Value) -> Result<Vec<Vec<f32>>, BackendError> {
    payload
        .pointer("/embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no embeddings array".to_string(),
        })?
        .iter()
        .map(|item| parse_vector(BACKEND, item))
        .collect()
}

fn parse_generate_response(payload: &Value) -> Result<String, BackendError> {
    if let Some(error) = payload.pointer("/error").and_then(Value::as_str) {
        return Err(BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: error.to_string(),
        });
    }

    payload
        .pointer("/response")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no generated text".to_string(),
        })
}

#[async_trait]
impl Embedder for OllamaBackend {
    fn model_id(&self) -> String {
        self.config.embedding_model_id()
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        ensure_inputs(texts)?;
        let url = endpoint(&self.config.base_url, "api/embed")?;

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let mut body = json!({
                "model": self.config.embedding_model,
                "input": batch,
                "keep_alive": KEEP_ALIVE,
            });
            if let Some(dimensions) = self.config.embedding_dimensions {
                body["dimensions"] = json!(dimensions);
            }

            let payload = with_backoff("ollama embed", self.config.retry, || {
                post_json(&self.client, BACKEND, url.clone(), None, &body)
            })
            .await?;

            let embedded = finish_batch(
                BACKEND,
                batch.len(),
                parse_embed_response(&payload)?,
                self.config.embedding_dimensions,
                self.config.normalize_embeddings,
            )?;

            if let (Some(first), Some(next)) = (vectors.first(), embedded.first()) {
                if first.len() != next.len() {
                    return Err(BackendError::BackendResponse {
                        backend: BACKEND.to_string(),
                        details: "batches returned different dimensions".to_string(),
                    });
                }
            }
            vectors.extend(embedded);
            debug!(done = vectors.len(), total = texts.len(), "embedded batch");
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Generator for OllamaBackend {
    fn model_id(&self) -> String {
        format!("local:{}", self.config.generation_model)
    }

    #[instrument(skip_all, fields(model = %self.config.generation_model))]
    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, BackendError> {
        let url = endpoint(&self.config.base_url, "api/generate")?;

        let mut body = json!({
            "model": self.config.generation_model,
            "prompt": prompt,
            "stream": false,
            "keep_alive": KEEP_ALIVE,
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            },
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let payload = with_backoff("ollama generate", self.config.retry, || {
            post_json(&self.client, BACKEND, url.clone(), None, &body)
        })
        .await?;

        parse_generate_response(&payload)
    }
}
