use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub path: String,
    pub page_number: u32,
}

/// A run of words from a single page of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// A chunk annotated with its embedding. Serialized flat, so the JSON record
/// is the chunk record plus an `embedding` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub position: usize,
    pub score: f32,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<RetrievedChunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub project: String,
    pub documents: usize,
    pub chunks: usize,
    pub dimensions: usize,
    pub embedding_model: String,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_chunk_serializes_flat() {
        let embedded = EmbeddedChunk {
            chunk: Chunk {
                content: "Hello world".to_string(),
                metadata: ChunkMetadata {
                    source: "a.pdf".to_string(),
                    path: "/data/a.pdf".to_string(),
                    page_number: 1,
                },
            },
            embedding: vec![0.5, 0.25],
        };

        let value = serde_json::to_value(&embedded).unwrap();
        assert_eq!(value["content"], "Hello world");
        assert_eq!(value["metadata"]["source"], "a.pdf");
        assert_eq!(value["metadata"]["page_number"], 1);
        assert_eq!(value["embedding"][1], 0.25);

        let back: EmbeddedChunk = serde_json::from_value(value).unwrap();
        assert_eq!(back, embedded);
    }
}
