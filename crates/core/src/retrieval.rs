use crate::artifacts::{read_json, ProjectPaths};
use crate::error::QueryError;
use crate::generation::{format_context, render_prompt, NO_CONTEXT_ANSWER, SYSTEM_PROMPT};
use crate::index::{l2_normalize, FlatIpIndex};
use crate::models::{Answer, Chunk, EmbeddedChunk, RetrievedChunk};
use crate::traits::{Embedder, GenerationParams, Generator};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 5;
/// Number of chunks placed in the prompt when answering.
pub const RAG_TOP_K: usize = 3;

const VECTOR_TOLERANCE: f32 = 1e-4;

/// A loaded index plus the chunk records it was built from. Read-only after
/// construction, so one instance can serve concurrent queries.
pub struct QueryPipeline {
    embedder: Arc<dyn Embedder>,
    index: FlatIpIndex,
    chunks: Vec<Chunk>,
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("model", &self.index.model_id())
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl QueryPipeline {
    /// Pairs an index with its chunk records after checking that they describe
    /// the same vectors, in the same order, from the configured embedder.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: FlatIpIndex,
        records: Vec<EmbeddedChunk>,
    ) -> Result<Self, QueryError> {
        index.ensure_model(&embedder.model_id())?;

        if index.len() != records.len() {
            return Err(QueryError::Inconsistent(format!(
                "index holds {} vectors but there are {} chunk records",
                index.len(),
                records.len()
            )));
        }

        for (position, record) in records.iter().enumerate() {
            if record.embedding.len() != index.dimension() {
                return Err(QueryError::Inconsistent(format!(
                    "record {position} has dimension {}, index has {}",
                    record.embedding.len(),
                    index.dimension()
                )));
            }

            let mut expected = record.embedding.clone();
            let stored = index.vector(position).unwrap_or_default();
            let matches = l2_normalize(&mut expected)
                && stored
                    .iter()
                    .zip(&expected)
                    .all(|(left, right)| (left - right).abs() <= VECTOR_TOLERANCE);
            if !matches {
                return Err(QueryError::Inconsistent(format!(
                    "vector at position {position} differs from its chunk record"
                )));
            }
        }

        let chunks = records.into_iter().map(|record| record.chunk).collect();
        Ok(Self {
            embedder,
            index,
            chunks,
        })
    }

    pub fn load(paths: &ProjectPaths, embedder: Arc<dyn Embedder>) -> Result<Self, QueryError> {
        Self::load_files(&paths.index, &paths.embedded_chunks, embedder)
    }

    pub fn load_files(
        index_path: &Path,
        records_path: &Path,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, QueryError> {
        for path in [index_path, records_path] {
            if !path.is_file() {
                return Err(QueryError::MissingArtifact(path.to_path_buf()));
            }
        }

        let index = FlatIpIndex::load(index_path)?;
        let records: Vec<EmbeddedChunk> = read_json(records_path)?;
        let pipeline = Self::new(embedder, index, records)?;
        info!(
            index = %index_path.display(),
            chunks = pipeline.chunks.len(),
            "query pipeline ready"
        );
        Ok(pipeline)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Embeds the query with the corpus embedder and returns up to `top_k`
    /// chunks by descending similarity.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if top_k == 0 {
            return Err(QueryError::InvalidTopK);
        }

        let query_vector = self.embedder.embed(query).await?;
        let neighbors = self.index.search(&query_vector, top_k)?;

        let mut retrieved = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            match self.chunks.get(neighbor.position) {
                Some(chunk) => retrieved.push(RetrievedChunk {
                    position: neighbor.position,
                    score: neighbor.score,
                    chunk: chunk.clone(),
                }),
                None => warn!(position = neighbor.position, "search returned a position with no chunk"),
            }
        }

        debug!(top_k, found = retrieved.len(), "retrieved chunks");
        Ok(retrieved)
    }

    /// Retrieves context and returns the assembled prompt alongside it.
    pub async fn build_prompt(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<(String, Vec<RetrievedChunk>), QueryError> {
        let retrieved = self.retrieve(query, top_k).await?;
        let context = format_context(retrieved.iter().map(|hit| &hit.chunk));
        Ok((render_prompt(&context, query), retrieved))
    }

    pub async fn answer(
        &self,
        generator: &dyn Generator,
        query: &str,
        top_k: usize,
        params: GenerationParams,
    ) -> Result<Answer, QueryError> {
        let (prompt, sources) = self.build_prompt(query, top_k).await?;

        if sources.is_empty() {
            return Ok(Answer {
                text: NO_CONTEXT_ANSWER.to_string(),
                sources,
            });
        }

        let text = generator.generate(Some(SYSTEM_PROMPT), &prompt, params).await?;
        info!(model = %generator.model_id(), sources = sources.len(), "generated answer");
        Ok(Answer { text, sources })
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    use crate::error::BackendError;
    use crate::traits::{GenerationParams, Generator};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every prompt and answers with a fixed reply.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        pub reply: String,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn replying(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn model_id(&self) -> String {
            "test:scripted".to_string()
        }

        async fn generate(
            &self,
            _system: Option<&str>,
            prompt: &str,
            _params: GenerationParams,
        ) -> Result<String, BackendError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok(self.reply.clone())
        }
    }
}
