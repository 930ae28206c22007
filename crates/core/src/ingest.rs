use crate::artifacts::{read_json, write_json};
use crate::chunking::chunk_pages;
use crate::error::IngestError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{Chunk, ChunkingConfig};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    discover_files_with_extension(folder, "pdf")
}

fn discover_files_with_extension(folder: &Path, wanted: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted));

        if matches {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// Extracts and chunks one PDF. The chunk metadata records the file name and
/// the absolute path of the source.
pub fn extract_pdf_chunks(
    extractor: &dyn PdfExtractor,
    path: &Path,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    config.validate()?;

    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?;
    let absolute = std::path::absolute(path).map_err(|error| IngestError::io(path, error))?;

    let pages = extractor.extract_pages(path)?;
    let chunks = chunk_pages(&pages, source, &absolute.to_string_lossy(), config)?;

    if chunks.is_empty() {
        warn!(path = %path.display(), "pdf has no extractable text");
    }
    Ok(chunks)
}

/// Writes one `<name>.pdf.json` chunk file per PDF found under `pdf_dir`. The first
/// unreadable PDF aborts the run.
pub fn extract_folder(
    pdf_dir: &Path,
    chunk_dir: &Path,
    config: ChunkingConfig,
) -> Result<usize, IngestError> {
    extract_folder_with(&LopdfExtractor, pdf_dir, chunk_dir, config)
}

pub fn extract_folder_with(
    extractor: &dyn PdfExtractor,
    pdf_dir: &Path,
    chunk_dir: &Path,
    config: ChunkingConfig,
) -> Result<usize, IngestError> {
    let files = discover_pdf_files(pdf_dir);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            pdf_dir.display()
        )));
    }

    fs::create_dir_all(chunk_dir).map_err(|error| IngestError::io(chunk_dir, error))?;

    // Case-folded so that names differing only in case are caught on
    // case-insensitive file systems too.
    let mut claimed = HashMap::<String, &Path>::new();
    for path in &files {
        let output = chunk_file_for(pdf_dir, path, chunk_dir);
        let key = output.to_string_lossy().to_lowercase();
        if let Some(previous) = claimed.insert(key, path) {
            return Err(IngestError::InvalidArgument(format!(
                "{} and {} would share the chunk file {}",
                previous.display(),
                path.display(),
                output.display()
            )));
        }
    }

    for path in &files {
        let chunks = extract_pdf_chunks(extractor, path, config)?;
        let output = chunk_file_for(pdf_dir, path, chunk_dir);
        write_json(&output, &chunks)?;
        info!(pdf = %path.display(), chunks = chunks.len(), "extracted pdf");
    }

    Ok(files.len())
}

/// Flattens the PDF's position under `pdf_dir` into one file name that keeps
/// the original extension. `%` is escaped before folders are joined with
/// `%2F`, so distinct relative paths never share a name.
fn chunk_file_for(pdf_dir: &Path, pdf: &Path, chunk_dir: &Path) -> PathBuf {
    let relative = pdf.strip_prefix(pdf_dir).unwrap_or(pdf);
    let mut flattened = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().replace('%', "%25"))
        .collect::<Vec<_>>()
        .join("%2F");
    flattened.push_str(".json");
    chunk_dir.join(flattened)
}

/// Concatenates every chunk file in `chunk_dir`, in sorted file-name order.
pub fn merge_chunks(chunk_dir: &Path) -> Result<Vec<Chunk>, IngestError> {
    let files = discover_files_with_extension(chunk_dir, "json");

    let mut merged = Vec::new();
    for path in files {
        let chunks: Vec<Chunk> = read_json(&path)?;
        merged.extend(chunks);
    }

    info!(dir = %chunk_dir.display(), chunks = merged.len(), "merged chunk files");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::fixtures::{words, write_text_pdf};
    use crate::extractor::PageText;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    struct FakeExtractor;

    impl PdfExtractor for FakeExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
            let name = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
            Ok(vec![PageText {
                number: 1,
                text: format!("{name} body text"),
            }])
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn extraction_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let result = extract_folder(dir.path(), &dir.path().join("chunks"), ChunkingConfig::default());
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn unreadable_pdf_aborts_the_folder() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdfs = dir.path().join("pdfs");
        fs::create_dir(&pdfs)?;
        fs::write(pdfs.join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;

        let error =
            extract_folder(&pdfs, &dir.path().join("chunks"), ChunkingConfig::default()).unwrap_err();

        assert!(error.to_string().contains("unreadable.pdf"));
        Ok(())
    }

    #[test]
    fn extract_then_merge_keeps_file_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdfs = dir.path().join("pdfs");
        let chunks_dir = dir.path().join("chunks");
        fs::create_dir_all(pdfs.join("sub"))?;
        fs::write(pdfs.join("b.pdf"), b"")?;
        fs::write(pdfs.join("a.pdf"), b"")?;
        fs::write(pdfs.join("sub").join("a.pdf"), b"")?;

        let count = extract_folder_with(&FakeExtractor, &pdfs, &chunks_dir, ChunkingConfig::default())?;
        assert_eq!(count, 3);
        assert!(chunks_dir.join("a.pdf.json").exists());
        assert!(chunks_dir.join("sub%2Fa.pdf.json").exists());

        let first = merge_chunks(&chunks_dir)?;
        let second = merge_chunks(&chunks_dir)?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].metadata.source, "a.pdf");
        assert_eq!(first[1].metadata.source, "b.pdf");
        assert!(first[0].metadata.path.ends_with("a.pdf"));
        assert!(Path::new(&first[0].metadata.path).is_absolute());
        Ok(())
    }

    #[test]
    fn nested_and_underscored_names_keep_separate_chunk_files(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdfs = dir.path().join("pdfs");
        let chunks_dir = dir.path().join("chunks");
        fs::create_dir_all(pdfs.join("a"))?;
        fs::write(pdfs.join("a__b.pdf"), b"")?;
        fs::write(pdfs.join("a").join("b.pdf"), b"")?;
        fs::write(pdfs.join("100%.pdf"), b"")?;

        let count = extract_folder_with(&FakeExtractor, &pdfs, &chunks_dir, ChunkingConfig::default())?;

        assert_eq!(count, 3);
        assert_eq!(merge_chunks(&chunks_dir)?.len(), 3);
        assert!(chunks_dir.join("100%25.pdf.json").exists());
        Ok(())
    }

    #[test]
    fn names_differing_only_in_case_are_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdfs = dir.path().join("pdfs");
        fs::create_dir_all(&pdfs)?;
        fs::write(pdfs.join("manual.pdf"), b"")?;
        fs::write(pdfs.join("manual.PDF"), b"")?;
        if fs::read_dir(&pdfs)?.count() < 2 {
            // case-insensitive file system: only one file exists
            return Ok(());
        }

        let error = extract_folder_with(
            &FakeExtractor,
            &pdfs,
            &dir.path().join("chunks"),
            ChunkingConfig::default(),
        )
        .unwrap_err();

        assert!(matches!(error, IngestError::InvalidArgument(_)));
        assert!(error.to_string().contains("manual.PDF"));
        Ok(())
    }

    #[test]
    fn two_page_pdf_yields_three_chunks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.pdf");
        write_text_pdf(&path, &[words("p", 600), words("q", 30)]);

        let chunks = extract_pdf_chunks(&LopdfExtractor, &path, ChunkingConfig::default())?;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].word_count(), 500);
        assert_eq!(chunks[1].word_count(), 150);
        assert_eq!(chunks[2].word_count(), 30);
        assert_eq!(chunks[0].metadata.page_number, 1);
        assert_eq!(chunks[1].metadata.page_number, 1);
        assert_eq!(chunks[2].metadata.page_number, 2);
        assert_eq!(chunks[2].metadata.source, "manual.pdf");
        Ok(())
    }
}
