use crate::retry::RetryPolicy;
use crate::traits::GenerationParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_REMOTE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LOCAL_URL: &str = "http://localhost:11434";

/// Which family of models serves embeddings and generation. Build and query
/// must run with the same kind and embedding model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// OpenAI-compatible HTTP API.
    #[default]
    Remote,
    /// Models resident in a local Ollama daemon.
    Local,
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "openai" => Ok(BackendKind::Remote),
            "local" | "ollama" => Ok(BackendKind::Local),
            _ => Err(format!("unknown backend: {s}")),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Remote => write!(f, "remote"),
            BackendKind::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub embedding_model: String,
    /// Requested output size for models that support shortening.
    pub embedding_dimensions: Option<u32>,
    /// L2-normalize vectors as they come back from the backend.
    pub normalize_embeddings: bool,
    pub generation_model: String,
    pub generation: GenerationParams,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl BackendConfig {
    pub fn remote(api_key: Option<String>) -> Self {
        Self {
            kind: BackendKind::Remote,
            base_url: DEFAULT_REMOTE_URL.to_string(),
            api_key,
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: None,
            normalize_embeddings: false,
            generation_model: "gpt-3.5-turbo".to_string(),
            generation: GenerationParams::default(),
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    pub fn local() -> Self {
        Self {
            kind: BackendKind::Local,
            base_url: DEFAULT_LOCAL_URL.to_string(),
            api_key: None,
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimensions: None,
            normalize_embeddings: true,
            generation_model: "tinyllama".to_string(),
            generation: GenerationParams::default(),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    pub fn for_kind(kind: BackendKind, api_key: Option<String>) -> Self {
        match kind {
            BackendKind::Remote => Self::remote(api_key),
            BackendKind::Local => Self::local(),
        }
    }

    /// Names the embedding space; stored in the index and checked at query time.
    pub fn embedding_model_id(&self) -> String {
        match self.embedding_dimensions {
            Some(dimensions) => format!("{}:{}@{}", self.kind, self.embedding_model, dimensions),
            None => format!("{}:{}", self.kind, self.embedding_model),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("OpenAI".parse::<BackendKind>().unwrap(), BackendKind::Remote);
        assert_eq!("ollama".parse::<BackendKind>().unwrap(), BackendKind::Local);
        assert!("faiss".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Local.to_string(), "local");
    }

    #[test]
    fn model_id_binds_kind_model_and_dimensions() {
        let mut config = BackendConfig::remote(None);
        assert_eq!(config.embedding_model_id(), "remote:text-embedding-3-small");

        config.embedding_dimensions = Some(256);
        assert_eq!(config.embedding_model_id(), "remote:text-embedding-3-small@256");

        assert_eq!(BackendConfig::local().embedding_model_id(), "local:nomic-embed-text");
    }

    #[test]
    fn defaults_follow_generation_contract() {
        let config = BackendConfig::for_kind(BackendKind::Remote, Some("key".to_string()));
        assert_eq!(config.generation.max_tokens, 512);
        assert_eq!(config.generation.temperature, 0.0);
        assert_eq!(config.api_key.as_deref(), Some("key"));
    }
}
