//! OpenAI-compatible embeddings and chat completions over HTTP.

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

const BACKEND: &str = "openai";

pub struct OpenAiBackend {
    client: Client,
    config: BackendConfig,
}

impl OpenAiBackend {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        if config.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
            return Err(BackendError::Config(
                "the remote backend needs an API key".to_string(),
            ));
        }
        Ok(Self {
            client: http_client(&config)?,
            config,
        })
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let url = endpoint(&self.config.base_url, "embeddings")?;
        let mut body = json!({
            "model": self.config.embedding_model,
            "input": texts,
        });
        if let Some(dimensions) = self.config.embedding_dimensions {
            body["dimensions"] = json!(dimensions);
        }

        let payload = with_backoff("openai embeddings", self.config.retry, || {
            post_json(
                &self.client,
                BACKEND,
                url.clone(),
                self.config.api_key.as_deref(),
                &body,
            )
        })
        .await?;

        parse_embedding_response(&payload)
    }
}

/// Reads `data[*].embedding`, reordered by each item's `index`.
fn parse_embedding_response(payload: &Value) -> Result<Vec<Vec<f32>>, BackendError> {
    let data = payload
        .pointer("/data")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no data array".to_string(),
        })?;

    let mut indexed = data
        .iter()
        .enumerate()
        .map(|(position, item)| {
            let index = item
                .pointer("/index")
                .and_then(Value::as_u64)
                .map(|index| index as usize)
                .unwrap_or(position);
            let embedding = item.pointer("/embedding").ok_or_else(|| BackendError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("item {position} has no embedding"),
            })?;
            Ok((index, parse_vector(BACKEND, embedding)?))
        })
        .collect::<Result<Vec<_>, BackendError>>()?;

    indexed.sort_by_key(|(index, _)| *index);
    if let Some(position) = indexed
        .iter()
        .enumerate()
        .position(|(position, (index, _))| *index != position)
    {
        return Err(BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!(
                "embedding indices are not 0..{}: position {position} holds index {}",
                indexed.len(),
                indexed[position].0
            ),
        });
    }
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

fn parse_chat_response(payload: &Value) -> Result<String, BackendError> {
    payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| BackendError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "response has no message content".to_string(),
        })
}

#[async_trait]
impl Embedder for OpenAiBackend {
    fn model_id(&self) -> String {
        self.config.embedding_model_id()
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        ensure_inputs(texts)?;

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let embedded = self.embed_request(batch).await?;
            let embedded = finish_batch(
                BACKEND,
                batch.len(),
                embedded,
                self.config.embedding_dimensions,
                self.config.normalize_embeddings,
            )?;
            vectors.extend(embedded);
            debug!(done = vectors.len(), total = texts.len(), "embedded batch");
        }

        if let Some(first) = vectors.first() {
            let width = first.len();
            if vectors.iter().any(|vector| vector.len() != width) {
                return Err(BackendError::BackendResponse {
                    backend: BACKEND.to_string(),
                    details: "batches returned different dimensions".to_string(),
                });
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Generator for OpenAiBackend {
    fn model_id(&self) -> String {
        format!("remote:{}", self.config.generation_model)
    }

    #[instrument(skip_all, fields(model = %self.config.generation_model))]
    async fn generate(
        &self,
        system: Option<&str>,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, BackendError> {
        let url = endpoint(&self.config.base_url, "chat/completions")?;

        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": self.config.generation_model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        let payload = with_backoff("openai chat", self.config.retry, || {
            post_json(
                &self.client,
                BACKEND,
                url.clone(),
                self.config.api_key.as_deref(),
                &body,
            )
        })
        .await?;

        parse_chat_response(&payload)
    }
}
