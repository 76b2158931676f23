//! Text chunking
//!
//! Splits documents into overlapping chunks with a layered separator list and
//! annotates each chunk with provenance metadata. Sizes are in characters.

use crate::errors::IngestionError;
use crate::loader::{Document, DocumentFormat};
use crate::metadata::MetadataExtractors;
use drrag_common::config::ChunkingConfig;
use drrag_common::models::{Chunk, ChunkMetadata};
use std::collections::VecDeque;
use tracing::debug;

/// Preferred break points, coarsest first; "" splits between characters
pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n\n", "--- Page", "\n\n", "\n", ". ", " ", ""];

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Recursive character splitter
///
/// Splits on the first separator present in the text, keeping each separator
/// at the start of the piece that follows it. Pieces still too large are
/// split again with the remaining separators; small pieces are merged back
/// into chunks of at most `chunk_size` characters that share up to
/// `chunk_overlap` trailing characters with their predecessor.
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<&'static str>,
}

impl RecursiveSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestionError> {
        if chunk_size == 0 {
            return Err(IngestionError::InvalidSettings(
                "chunk size must be positive".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(IngestionError::InvalidSettings(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap, chunk_size
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.to_vec(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&'static str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut remaining: &[&'static str] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                small.push(piece);
                continue;
            }

            if !small.is_empty() {
                chunks.extend(self.merge(&small));
                small.clear();
            }
            if remaining.is_empty() {
                // Nothing finer to split on
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_recursive(piece, remaining));
            }
        }

        if !small.is_empty() {
            chunks.extend(self.merge(&small));
        }
        chunks
    }

    /// Greedily pack pieces into chunks, carrying the overlap forward
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_joined(&mut chunks, &window);
        chunks
    }
}

fn push_joined(chunks: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Split on every occurrence of `separator`, attaching it to the following piece
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, _) in text.match_indices(separator) {
        if pos > start {
            pieces.push(&text[start..pos]);
        }
        start = pos;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Turns documents into annotated chunks
#[derive(Debug, Clone)]
pub struct Chunker {
    splitter: RecursiveSplitter,
    extractors: MetadataExtractors,
}

impl Chunker {
    pub fn new(splitter: RecursiveSplitter) -> Self {
        Self {
            splitter,
            extractors: MetadataExtractors::default(),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, IngestionError> {
        Ok(Self::new(RecursiveSplitter::new(
            config.chunk_size,
            config.chunk_overlap,
        )?))
    }

    pub fn with_extractors(mut self, extractors: MetadataExtractors) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn splitter(&self) -> &RecursiveSplitter {
        &self.splitter
    }

    /// Split a document into chunks in document order
    pub fn split(&self, document: &Document) -> Result<Vec<Chunk>, IngestionError> {
        if let DocumentFormat::Other(_) = document.format {
            return Err(IngestionError::UnsupportedFormat {
                path: document.source_document_id.clone(),
                format: document.format.to_string(),
            });
        }

        let texts = self.splitter.split_text(&document.text);
        let total_chunks = texts.len();

        let chunks: Vec<Chunk> = texts
            .into_iter()
            .enumerate()
            .map(|(chunk_index, text)| {
                let metadata = ChunkMetadata {
                    source_document_id: document.source_document_id.clone(),
                    book_name: document.book_name.clone(),
                    chunk_index,
                    total_chunks,
                    page_number: (self.extractors.page)(&text),
                    chapter: (self.extractors.chapter)(&text),
                    entity_name: (self.extractors.entity)(&text),
                };
                Chunk::new(text, metadata)
            })
            .collect();

        debug!(
            document = %document.source_document_id,
            input_chars = document.text.len(),
            chunk_count = chunks.len(),
            chunk_size = self.splitter.chunk_size,
            "Document chunked"
        );

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(text: &str) -> Document {
        Document {
            text: text.to_string(),
            book_name: "Boericke Materia Medica".to_string(),
            source_document_id: "data/Boericke_Materia_Medica.txt".to_string(),
            format: DocumentFormat::PlainText,
        }
    }

    #[test]
    fn test_character_fallback_overlaps() {
        let splitter = RecursiveSplitter::new(1000, 200).unwrap();
        let text: String = (0..2400).map(|i| char::from(b'a' + (i % 26) as u8)).collect();

        let chunks = splitter.split_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(char_len(&chunks[0]), 1000);
        assert_eq!(char_len(&chunks[1]), 1000);
        assert_eq!(char_len(&chunks[2]), 800);
        assert_eq!(&chunks[0][800..], &chunks[1][..200]);
        assert_eq!(&chunks[1][800..], &chunks[2][..200]);
        assert_eq!(chunks[2], text[1600..]);
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let splitter = RecursiveSplitter::new(100, 20).unwrap();
        assert_eq!(splitter.split_text("  Arnica. Bruised.  "), vec!["Arnica. Bruised."]);
        assert!(splitter.split_text("   \n\n ").is_empty());
    }

    #[test]
    fn test_prefers_section_breaks() {
        let splitter = RecursiveSplitter::new(40, 5).unwrap();
        let text = "ACONITE.\nSudden fear.\n\n\nARNICA.\nBruised soreness.";
        assert_eq!(
            splitter.split_text(text),
            vec!["ACONITE.\nSudden fear.", "ARNICA.\nBruised soreness."]
        );
    }

    #[test]
    fn test_page_marker_starts_chunk() {
        let splitter = RecursiveSplitter::new(40, 0).unwrap();
        let text = "--- Page 1 ---\nAconite fear.\n--- Page 2 ---\nArnica bruised.";
        assert_eq!(
            splitter.split_text(text),
            vec!["--- Page 1 ---\nAconite fear.", "--- Page 2 ---\nArnica bruised."]
        );
    }

    #[test]
    fn test_chunks_never_exceed_size() {
        let splitter = RecursiveSplitter::new(50, 10).unwrap();
        let text = "Fear of death. Restlessness at night. Burning pains better from heat.\n\
            Thirst for small sips. Worse after midnight. Anxiety with weakness.";
        let chunks = splitter.split_text(text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| char_len(c) <= 50));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(RecursiveSplitter::new(0, 0).is_err());
        assert!(RecursiveSplitter::new(100, 100).is_err());
        assert!(RecursiveSplitter::new(100, 99).is_ok());
    }

    #[test]
    fn test_split_keeping_separator() {
        assert_eq!(split_keeping_separator("a. b. c", ". "), vec!["a", ". b", ". c"]);
        assert_eq!(split_keeping_separator("\n\nx", "\n\n"), vec!["\n\nx"]);
        assert_eq!(split_keeping_separator("äb", ""), vec!["ä", "b"]);
    }

    #[test]
    fn test_chunk_metadata_and_citations() {
        let chunker = Chunker::new(RecursiveSplitter::new(60, 0).unwrap());
        let text = "--- Page 3 ---\nACONITUM NAPELLUS.\nGreat fear.\n\n\n\
            Chapter 2\nMind symptoms and anxiety.\n\n\n\
            plain text without markers here";
        let chunks = chunker.split(&document(text)).unwrap();

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.metadata().chunk_index, i);
            assert_eq!(chunk.metadata().total_chunks, 3);
            assert_eq!(chunk.book_name(), "Boericke Materia Medica");
        }

        assert_eq!(chunks[0].metadata().page_number, Some(3));
        assert_eq!(chunks[0].citation(), Some("Boericke Materia Medica - Page 3"));

        assert_eq!(chunks[1].metadata().chapter.as_deref(), Some("2"));
        assert_eq!(chunks[1].citation(), Some("Boericke Materia Medica - Chapter 2"));

        assert_eq!(chunks[2].metadata().page_number, None);
        assert_eq!(chunks[2].citation(), Some("Boericke Materia Medica - Section 3/3"));
    }

    #[test]
    fn test_entity_detected_at_chunk_start() {
        let chunker = Chunker::new(RecursiveSplitter::new(200, 0).unwrap());
        let chunks = chunker.split(&document("ARSENICUM ALBUM.\nBurning pains.")).unwrap();
        assert_eq!(chunks[0].metadata().entity_name.as_deref(), Some("ARSENICUM ALBUM"));
    }

    #[test]
    fn test_unsupported_format_fails_document() {
        let chunker = Chunker::from_config(&ChunkingConfig::default()).unwrap();
        let mut doc = document("text");
        doc.format = DocumentFormat::Other("epub".to_string());
        assert!(matches!(
            chunker.split(&doc),
            Err(IngestionError::UnsupportedFormat { .. })
        ));
    }
}
