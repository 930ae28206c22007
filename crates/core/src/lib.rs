pub mod agent;
pub mod artifacts;
pub mod backends;
pub mod build;
pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod file_index;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retrieval;
pub mod retry;
pub mod traits;

pub use agent::{parse_decision, Agent, AgentAction, Decision, INVALID_PROJECT};
pub use artifacts::{ProjectLayout, ProjectPaths, GLOBAL_PROJECT};
pub use backends::connect;
pub use build::ProjectBuilder;
pub use chunking::{chunk_pages, chunk_words};
pub use config::{BackendConfig, BackendKind};
pub use embeddings::{embed_chunk_file, embed_chunks, save_embeddings};
pub use error::{BackendError, IndexError, IngestError, QueryError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use file_index::{build_file_index, format_file_listing, load_file_index, FileIndex};
pub use generation::{format_prompt, NO_CONTEXT_ANSWER, SYSTEM_PROMPT};
pub use index::{build_index_file, FlatIpIndex, Neighbor};
pub use ingest::{discover_pdf_files, extract_folder, extract_pdf_chunks, merge_chunks};
pub use models::{
    Answer, BuildReport, Chunk, ChunkMetadata, ChunkingConfig, EmbeddedChunk, RetrievedChunk,
};
pub use retrieval::{QueryPipeline, DEFAULT_TOP_K, RAG_TOP_K};
pub use retry::RetryPolicy;
pub use traits::{Embedder, GenerationParams, Generator};
