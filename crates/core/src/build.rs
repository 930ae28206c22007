//! Offline build: PDFs to chunk files, embeddings and a flat index per project.

use crate::artifacts::{
    encode_json, encode_npy_matrix, read_json, stage, write_json, ProjectLayout, ProjectPaths,
    GLOBAL_PROJECT,
};
use crate::embeddings::embed_chunks;
use crate::error::{IndexError, IngestError};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::index::FlatIpIndex;
use crate::ingest::{extract_folder_with, merge_chunks};
use crate::models::{BuildReport, ChunkingConfig, EmbeddedChunk};
use crate::traits::Embedder;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use tracing::{info, instrument, warn};

pub struct ProjectBuilder {
    layout: ProjectLayout,
    embedder: Arc<dyn Embedder>,
    extractor: Box<dyn PdfExtractor>,
    chunking: ChunkingConfig,
}

impl ProjectBuilder {
    pub fn new(layout: ProjectLayout, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            layout,
            embedder,
            extractor: Box::new(LopdfExtractor),
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn layout(&self) -> &ProjectLayout {
        &self.layout
    }

    /// Builds one project. `global` is assembled from the other projects
    /// instead of being extracted.
    #[instrument(skip(self))]
    pub async fn build_project(&self, name: &str) -> Result<BuildReport, IngestError> {
        if name == GLOBAL_PROJECT {
            return self.build_global().await;
        }
        self.chunking.validate()?;

        let paths = self.layout.project(name);
        if paths.pdfs.starts_with(&paths.chunks) {
            return Err(IngestError::InvalidArgument(format!(
                "pdf folder {} lies inside the generated chunk folder",
                paths.pdfs.display()
            )));
        }
        reset_chunk_dir(&paths)?;

        let documents =
            extract_folder_with(self.extractor.as_ref(), &paths.pdfs, &paths.chunks, self.chunking)?;
        let chunks = merge_chunks(&paths.chunks)?;
        write_json(&paths.merged_chunks, &chunks)?;
        info!(project = %name, documents, chunks = chunks.len(), "chunks merged");

        let embedded = embed_chunks(self.embedder.as_ref(), chunks).await?;
        self.persist(&paths, &embedded, documents)
    }

    /// Concatenates the embedded chunks of every other project, in project name
    /// order, into the `global` project. Projects that were never built are
    /// skipped; projects embedded with a different model are an error.
    #[instrument(skip(self))]
    pub async fn build_global(&self) -> Result<BuildReport, IngestError> {
        let model_id = self.embedder.model_id();
        let mut combined = Vec::new();

        for project in self.layout.list_projects()? {
            if project == GLOBAL_PROJECT {
                continue;
            }
            let paths = self.layout.project(&project);
            if !paths.embedded_chunks.is_file() || !paths.index.is_file() {
                warn!(%project, "project has no built artifacts; not included in global");
                continue;
            }

            FlatIpIndex::load(&paths.index)?.ensure_model(&model_id)?;
            let records: Vec<EmbeddedChunk> = read_json(&paths.embedded_chunks)?;
            info!(%project, chunks = records.len(), "adding project to global");
            combined.extend(records);
        }

        if combined.is_empty() {
            return Err(IndexError::EmptyCorpus.into());
        }

        let documents = combined
            .iter()
            .map(|record| record.chunk.metadata.path.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let paths = self.layout.project(GLOBAL_PROJECT);
        fs::create_dir_all(&paths.dir).map_err(|error| IngestError::io(&paths.dir, error))?;
        self.persist(&paths, &combined, documents)
    }

    /// Builds every project under the root, `global` last.
    pub async fn build_all(&self) -> Result<Vec<BuildReport>, IngestError> {
        let projects = self.layout.list_projects()?;
        if projects.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no project directories under {}",
                self.layout.root.display()
            )));
        }

        let mut reports = Vec::with_capacity(projects.len());
        for project in projects.iter().filter(|name| name.as_str() != GLOBAL_PROJECT) {
            reports.push(self.build_project(project).await?);
        }
        if projects.iter().any(|name| name == GLOBAL_PROJECT) {
            reports.push(self.build_global().await?);
        }
        Ok(reports)
    }

    fn persist(
        &self,
        paths: &ProjectPaths,
        embedded: &[EmbeddedChunk],
        documents: usize,
    ) -> Result<BuildReport, IngestError> {
        let model_id = self.embedder.model_id();
        let vectors = embedded
            .iter()
            .map(|record| record.embedding.clone())
            .collect::<Vec<_>>();
        let index = FlatIpIndex::build(&vectors, model_id.as_str())?;

        // Nothing is renamed until all three files are on disk; the index goes
        // last so it never points at records from an older build.
        let staged = [
            stage(&paths.embeddings, &encode_npy_matrix(&vectors)?)?,
            stage(&paths.embedded_chunks, &encode_json(&paths.embedded_chunks, embedded)?)?,
            stage(&paths.index, &index.to_bytes())?,
        ];
        for file in staged {
            file.commit()?;
        }

        let report = BuildReport {
            project: paths.name.clone(),
            documents,
            chunks: index.len(),
            dimensions: index.dimension(),
            embedding_model: model_id,
            finished_at: Utc::now(),
        };
        info!(
            project = %report.project,
            chunks = report.chunks,
            dimensions = report.dimensions,
            "project built"
        );
        Ok(report)
    }
}

/// Chunk files of PDFs that were removed since the last build must not leak
/// into the merged corpus.
fn reset_chunk_dir(paths: &ProjectPaths) -> Result<(), IngestError> {
    if paths.chunks.is_dir() {
        fs::remove_dir_all(&paths.chunks).map_err(|error| IngestError::io(&paths.chunks, error))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::fakes::{FailingEmbedder, LetterEmbedder};
    use crate::extractor::PageText;
    use crate::retrieval::QueryPipeline;
    use std::path::Path;
    use tempfile::tempdir;

    /// One page whose text is the file stem repeated.
    struct StemExtractor;

    impl PdfExtractor for StemExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
            Ok(vec![PageText {
                number: 1,
                text: format!("{stem} {stem} {stem}"),
            }])
        }
    }

    fn add_pdf(root: &Path, project: &str, name: &str) {
        let pdfs = root.join(project).join("pdfs");
        fs::create_dir_all(&pdfs).unwrap();
        fs::write(pdfs.join(name), b"").unwrap();
    }

    fn builder(root: &Path) -> ProjectBuilder {
        ProjectBuilder::new(ProjectLayout::new(root), Arc::new(LetterEmbedder::default()))
            .with_extractor(Box::new(StemExtractor))
    }

    #[tokio::test]
    async fn project_build_writes_every_artifact() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "bridge", "alpha.pdf");
        add_pdf(dir.path(), "bridge", "zulu.pdf");

        let builder = builder(dir.path());
        let report = builder.build_project("bridge").await?;

        assert_eq!(report.documents, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.dimensions, 26);
        assert_eq!(report.embedding_model, "test:letters");

        let paths = builder.layout().project("bridge");
        for path in [&paths.merged_chunks, &paths.embeddings, &paths.embedded_chunks, &paths.index] {
            assert!(path.is_file(), "{} missing", path.display());
        }

        let pipeline = QueryPipeline::load(&paths, Arc::new(LetterEmbedder::default()))?;
        let hits = pipeline.retrieve("zulu", 1).await?;
        assert_eq!(hits[0].chunk.metadata.source, "zulu.pdf");
        Ok(())
    }

    #[tokio::test]
    async fn rebuild_drops_chunks_of_removed_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "bridge", "alpha.pdf");
        add_pdf(dir.path(), "bridge", "beta.pdf");
        let builder = builder(dir.path());
        builder.build_project("bridge").await?;

        fs::remove_file(dir.path().join("bridge").join("pdfs").join("beta.pdf"))?;
        let report = builder.build_project("bridge").await?;

        assert_eq!(report.chunks, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_rebuild_keeps_the_previous_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "bridge", "alpha.pdf");
        let builder = builder(dir.path());
        builder.build_project("bridge").await?;

        // digits carry no letters, so this document embeds to a zero vector
        add_pdf(dir.path(), "bridge", "1234.pdf");
        let error = builder.build_project("bridge").await.unwrap_err();
        assert!(matches!(error, IngestError::Index(IndexError::ZeroVector { .. })));

        let paths = builder.layout().project("bridge");
        let pipeline = QueryPipeline::load(&paths, Arc::new(LetterEmbedder::default()))?;
        assert_eq!(pipeline.len(), 1);
        assert_eq!(pipeline.chunks()[0].metadata.source, "alpha.pdf");

        let leftovers = fs::read_dir(&paths.dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn pdf_folder_inside_chunk_folder_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "bridge", "alpha.pdf");
        let source = dir.path().join("bridge").join("pdfs").join("alpha.pdf");
        let chunks = dir.path().join("bridge").join("chunks");
        fs::create_dir_all(&chunks)?;
        fs::copy(&source, chunks.join("alpha.pdf"))?;

        let builder = ProjectBuilder::new(
            ProjectLayout::new(dir.path()).with_pdf_dir("chunks"),
            Arc::new(LetterEmbedder::default()),
        )
        .with_extractor(Box::new(StemExtractor));
        let error = builder.build_project("bridge").await.unwrap_err();

        assert!(matches!(error, IngestError::InvalidArgument(_)));
        assert!(chunks.join("alpha.pdf").exists());
        Ok(())
    }

    #[tokio::test]
    async fn global_concatenates_projects_in_name_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "tunnel", "bore.pdf");
        add_pdf(dir.path(), "bridge", "deck.pdf");
        fs::create_dir_all(dir.path().join(GLOBAL_PROJECT))?;

        let builder = builder(dir.path());
        let reports = builder.build_all().await?;

        let names = reports.iter().map(|report| report.project.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["bridge", "tunnel", GLOBAL_PROJECT]);
        assert_eq!(reports[2].chunks, 2);
        assert_eq!(reports[2].documents, 2);

        let paths = builder.layout().project(GLOBAL_PROJECT);
        let records: Vec<EmbeddedChunk> = read_json(&paths.embedded_chunks)?;
        assert_eq!(records[0].chunk.metadata.source, "deck.pdf");
        assert_eq!(records[1].chunk.metadata.source, "bore.pdf");

        QueryPipeline::load(&paths, Arc::new(LetterEmbedder::default()))?;
        Ok(())
    }

    #[tokio::test]
    async fn global_rejects_projects_from_another_model() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        add_pdf(dir.path(), "bridge", "deck.pdf");
        builder(dir.path()).build_project("bridge").await?;

        let other = ProjectBuilder::new(
            ProjectLayout::new(dir.path()),
            Arc::new(LetterEmbedder {
                model: "test:other".to_string(),
            }),
        );
        let error = other.build_global().await.unwrap_err();

        assert!(matches!(
            error,
            IngestError::Index(IndexError::ModelMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn global_without_built_projects_is_empty() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("bridge")).unwrap();

        let error = builder(dir.path()).build_global().await.unwrap_err();
        assert!(matches!(error, IngestError::Index(IndexError::EmptyCorpus)));
    }

    #[tokio::test]
    async fn embedding_failure_leaves_no_index() {
        let dir = tempdir().unwrap();
        add_pdf(dir.path(), "bridge", "deck.pdf");

        let builder = ProjectBuilder::new(ProjectLayout::new(dir.path()), Arc::new(FailingEmbedder))
            .with_extractor(Box::new(StemExtractor));
        let result = builder.build_project("bridge").await;

        assert!(matches!(result, Err(IngestError::Backend(_))));
        assert!(!builder.layout().project("bridge").index.exists());
    }
}
