use crate::error::IngestError;
use crate::extractor::PageText;
use crate::models::{Chunk, ChunkMetadata, ChunkingConfig};

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Splits text into windows of `chunk_size` words whose starts advance by
/// `chunk_size - chunk_overlap`. A window running past the last word is kept,
/// just shorter. Whitespace-only text yields nothing.
pub fn chunk_words(text: &str, config: ChunkingConfig) -> Result<Vec<String>, IngestError> {
    config.validate()?;

    let words = text.split_whitespace().collect::<Vec<_>>();
    let chunks = (0..words.len())
        .step_by(config.stride())
        .map(|start| {
            let end = (start + config.chunk_size).min(words.len());
            words[start..end].join(" ")
        })
        .collect();

    Ok(chunks)
}

/// Chunks every page independently. Pages with no text produce no chunks.
pub fn chunk_pages(
    pages: &[PageText],
    source: &str,
    path: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>, IngestError> {
    let mut chunks = Vec::new();

    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }

        for content in chunk_words(&page.text, config)? {
            chunks.push(Chunk {
                content,
                metadata: ChunkMetadata {
                    source: source.to_string(),
                    path: path.to_string(),
                    page_number: page.number,
                },
            });
        }
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_words(count: usize) -> String {
        (0..count)
            .map(|index| format!("w{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
        }
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let zero = ChunkingConfig {
            chunk_size: 0,
            chunk_overlap: 0,
        };
        assert!(chunk_words("a b c", zero).is_err());

        let overlap_too_large = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 10,
        };
        assert!(chunk_words("a b c", overlap_too_large).is_err());
    }

    #[test]
    fn adjacent_chunks_overlap_by_configured_words() {
        let config = ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 3,
        };
        let chunks = chunk_words(&numbered_words(25), config).unwrap();

        for pair in chunks.windows(2) {
            let left = pair[0].split_whitespace().collect::<Vec<_>>();
            let right = pair[1].split_whitespace().collect::<Vec<_>>();
            assert_eq!(left.len(), 10);
            assert_eq!(&left[left.len() - 3..], &right[..3]);
        }
    }

    #[test]
    fn removing_overlaps_reconstructs_page_words() {
        let config = ChunkingConfig {
            chunk_size: 7,
            chunk_overlap: 2,
        };
        let text = numbered_words(31);
        let chunks = chunk_words(&text, config).unwrap();

        let mut rebuilt: Vec<&str> = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let words = chunk.split_whitespace().collect::<Vec<_>>();
            let skip = if index == 0 { 0 } else { config.chunk_overlap };
            rebuilt.extend(words.into_iter().skip(skip));
        }

        let original = text.split_whitespace().collect::<Vec<_>>();
        assert_eq!(&rebuilt[..original.len()], &original[..]);
        assert_eq!(rebuilt.len(), original.len());
    }

    #[test]
    fn default_config_windows_a_600_word_page() {
        let chunks = chunk_words(&numbered_words(600), ChunkingConfig::default()).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].split_whitespace().count(), 500);
        // second window starts at word 450 and runs out at word 600
        assert_eq!(chunks[1].split_whitespace().count(), 150);
        assert!(chunks[1].starts_with("w450 "));
    }

    #[test]
    fn whitespace_pages_are_skipped_and_pages_never_merge() {
        let pages = vec![
            page(1, &numbered_words(600)),
            page(2, "  \n\t "),
            page(3, &numbered_words(30)),
        ];

        let chunks = chunk_pages(&pages, "a.pdf", "/data/a.pdf", ChunkingConfig::default()).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].metadata.page_number, 1);
        assert_eq!(chunks[1].metadata.page_number, 1);
        assert_eq!(chunks[2].metadata.page_number, 3);
        assert_eq!(chunks[2].word_count(), 30);
        assert!(chunks.iter().all(|chunk| chunk.metadata.source == "a.pdf"));
    }

    #[test]
    fn chunking_is_deterministic() {
        let pages = vec![page(1, &numbered_words(1234))];
        let first = chunk_pages(&pages, "a.pdf", "/a.pdf", ChunkingConfig::default()).unwrap();
        let second = chunk_pages(&pages, "a.pdf", "/a.pdf", ChunkingConfig::default()).unwrap();
        assert_eq!(first, second);
    }
}
