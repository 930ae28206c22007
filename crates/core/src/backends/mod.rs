pub mod ollama;
pub mod openai;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::config::{BackendConfig, BackendKind};
use crate::error::BackendError;
use crate::index::l2_normalize;
use crate::traits::{Embedder, Generator};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;

/// Upper bound on texts sent in one embedding request.
pub const EMBED_BATCH_SIZE: usize = 100;

/// Builds the embedder and generator for one configuration. Both come from the
/// same value so a process never mixes backends.
pub fn connect(
    config: &BackendConfig,
) -> Result<(Arc<dyn Embedder>, Arc<dyn Generator>), BackendError> {
    match config.kind {
        BackendKind::Remote => {
            let backend = Arc::new(OpenAiBackend::new(config.clone())?);
            let embedder: Arc<dyn Embedder> = backend.clone();
            let generator: Arc<dyn Generator> = backend;
            Ok((embedder, generator))
        }
        BackendKind::Local => {
            let backend = Arc::new(OllamaBackend::new(config.clone())?);
            let embedder: Arc<dyn Embedder> = backend.clone();
            let generator: Arc<dyn Generator> = backend;
            Ok((embedder, generator))
        }
    }
}

pub(crate) fn http_client(config: &BackendConfig) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|error| BackendError::Config(format!("cannot build http client: {error}")))
}

/// Joins `path` onto `base`, keeping any path prefix `base` already has.
pub(crate) fn endpoint(base: &str, path: &str) -> Result<url::Url, BackendError> {
    let mut base = base.trim_end_matches('/').to_string();
    base.push('/');
    Ok(url::Url::parse(&base)?.join(path)?)
}

pub(crate) async fn post_json(
    client: &Client,
    backend: &str,
    url: url::Url,
    api_key: Option<&str>,
    body: &Value,
) -> Result<Value, BackendError> {
    let mut request = client.post(url).json(body);
    if let Some(api_key) = api_key {
        request = request.bearer_auth(api_key);
    }

    let response = request
        .send()
        .await
        .map_err(|error| BackendError::from_reqwest(backend, error))?;

    let status = response.status();
    if !status.is_success() {
        let details = response.text().await.unwrap_or_default();
        return Err(BackendError::Status {
            backend: backend.to_string(),
            status: status.as_u16(),
            details: details.chars().take(500).collect(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|error| BackendError::from_reqwest(backend, error))
}

pub(crate) fn parse_vector(backend: &str, value: &Value) -> Result<Vec<f32>, BackendError> {
    let items = value.as_array().ok_or_else(|| BackendError::BackendResponse {
        backend: backend.to_string(),
        details: "embedding is not an array".to_string(),
    })?;

    items
        .iter()
        .map(|item| {
            item.as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| BackendError::BackendResponse {
                    backend: backend.to_string(),
                    details: "embedding holds a non-numeric value".to_string(),
                })
        })
        .collect()
}

/// Checks count, non-emptiness and a shared dimension across a batch, then
/// optionally normalizes each vector.
pub(crate) fn finish_batch(
    backend: &str,
    expected: usize,
    mut vectors: Vec<Vec<f32>>,
    dimensions: Option<u32>,
    normalize: bool,
) -> Result<Vec<Vec<f32>>, BackendError> {
    if vectors.len() != expected {
        return Err(BackendError::CountMismatch {
            backend: backend.to_string(),
            expected,
            actual: vectors.len(),
        });
    }

    let width = dimensions
        .map(|value| value as usize)
        .or_else(|| vectors.first().map(Vec::len))
        .unwrap_or(0);

    for (position, vector) in vectors.iter_mut().enumerate() {
        if vector.is_empty() || vector.len() != width {
            return Err(BackendError::BackendResponse {
                backend: backend.to_string(),
                details: format!(
                    "embedding {position} has dimension {}, expected {width}",
                    vector.len()
                ),
            });
        }
        if normalize && !l2_normalize(vector) {
            return Err(BackendError::BackendResponse {
                backend: backend.to_string(),
                details: format!("embedding {position} has zero norm"),
            });
        }
    }

    Ok(vectors)
}

pub(crate) fn ensure_inputs(texts: &[String]) -> Result<(), BackendError> {
    if texts.is_empty() {
        return Err(BackendError::EmptyInput("no texts to embed".to_string()));
    }
    if let Some(position) = texts.iter().position(|text| text.trim().is_empty()) {
        return Err(BackendError::EmptyInput(format!("text {position} is blank")));
    }
    Ok(())
}
