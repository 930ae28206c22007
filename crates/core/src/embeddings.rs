use crate::artifacts::{read_json, write_json, write_npy_matrix};
use crate::error::{BackendError, IngestError};
use crate::models::{Chunk, EmbeddedChunk};
use crate::traits::Embedder;
use std::path::Path;
use tracing::info;

/// Embeds every chunk's content in order. The whole call fails if the backend
/// fails for any chunk; no placeholder vectors are ever substituted.
pub async fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: Vec<Chunk>,
) -> Result<Vec<EmbeddedChunk>, IngestError> {
    if chunks.is_empty() {
        return Err(BackendError::EmptyInput("corpus has no chunks to embed".to_string()).into());
    }

    let texts = chunks
        .iter()
        .map(|chunk| chunk.content.clone())
        .collect::<Vec<_>>();
    let vectors = embedder.embed_batch(&texts).await?;

    if vectors.len() != chunks.len() {
        return Err(BackendError::CountMismatch {
            backend: embedder.model_id(),
            expected: chunks.len(),
            actual: vectors.len(),
        }
        .into());
    }

    Ok(chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
        .collect())
}

/// Writes the raw `(N, D)` matrix and, when requested, the annotated records.
pub fn save_embeddings(
    embedded: &[EmbeddedChunk],
    out_npy: Option<&Path>,
    out_json: Option<&Path>,
) -> Result<(), IngestError> {
    if let Some(path) = out_npy {
        let matrix = embedded
            .iter()
            .map(|record| record.embedding.clone())
            .collect::<Vec<_>>();
        write_npy_matrix(path, &matrix)?;
        info!(path = %path.display(), rows = matrix.len(), "saved embeddings matrix");
    }

    if let Some(path) = out_json {
        write_json(path, embedded)?;
        info!(path = %path.display(), records = embedded.len(), "saved embedded chunks");
    }

    Ok(())
}

/// Loads a chunk file, embeds it and persists the results.
pub async fn embed_chunk_file(
    embedder: &dyn Embedder,
    input: &Path,
    out_npy: Option<&Path>,
    out_json: Option<&Path>,
) -> Result<Vec<EmbeddedChunk>, IngestError> {
    let chunks: Vec<Chunk> = read_json(input)?;
    info!(path = %input.display(), chunks = chunks.len(), model = %embedder.model_id(), "embedding chunks");

    let embedded = embed_chunks(embedder, chunks).await?;
    save_embeddings(&embedded, out_npy, out_json)?;
    Ok(embedded)
}
