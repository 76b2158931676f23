//! Chunk: the immutable unit of retrievable text

use serde::{Deserialize, Serialize};

/// Provenance of a chunk within its source document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Identifier of the parent document (its path at ingestion time)
    pub source_document_id: String,
    /// Human-readable title of the parent document
    pub book_name: String,
    /// 0-based position within the parent document
    pub chunk_index: usize,
    /// Number of sibling chunks in the parent document
    pub total_chunks: usize,
    pub page_number: Option<u32>,
    pub chapter: Option<String>,
    /// Named concept detected at the start of the chunk
    pub entity_name: Option<String>,
}

/// A text fragment with a citation fixed at creation time
///
/// Fields are private so the citation can never drift from the metadata it
/// was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    text: String,
    metadata: ChunkMetadata,
    citation: Option<String>,
}

impl Chunk {
    /// Create a chunk and derive its citation
    pub fn new(text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        let citation = build_citation(&metadata);
        Self {
            text: text.into(),
            metadata,
            citation: Some(citation),
        }
    }

    /// Rebuild a chunk read back from the corpus index, keeping the stored citation as is
    pub fn restore(text: impl Into<String>, metadata: ChunkMetadata, citation: Option<String>) -> Self {
        Self {
            text: text.into(),
            metadata,
            citation: citation.filter(|c| !c.trim().is_empty()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn metadata(&self) -> &ChunkMetadata {
        &self.metadata
    }

    /// Stored provenance label; absent only for index rows written without one
    pub fn citation(&self) -> Option<&str> {
        self.citation.as_deref()
    }

    pub fn book_name(&self) -> &str {
        &self.metadata.book_name
    }

    /// Index-wide identity: `{source_document_id}:{chunk_index}`
    pub fn id(&self) -> String {
        format!("{}:{}", self.metadata.source_document_id, self.metadata.chunk_index)
    }
}

/// A chunk with its embedding-space distance to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub chunk: Chunk,
    /// Non-negative; smaller is more similar
    pub distance: f32,
}

/// Citation label: book name plus exactly one of page, chapter or section
pub fn build_citation(metadata: &ChunkMetadata) -> String {
    let suffix = if let Some(page) = metadata.page_number {
        format!("Page {}", page)
    } else if let Some(chapter) = &metadata.chapter {
        format!("Chapter {}", chapter)
    } else {
        format!("Section {}/{}", metadata.chunk_index + 1, metadata.total_chunks)
    };

    format!("{} - {}", metadata.book_name, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> ChunkMetadata {
        ChunkMetadata {
            source_document_id: "data/Boericke_Materia_Medica.txt".to_string(),
            book_name: "Boericke Materia Medica".to_string(),
            chunk_index: 2,
            total_chunks: 10,
            page_number: None,
            chapter: None,
            entity_name: None,
        }
    }

    #[test]
    fn test_citation_prefers_page() {
        let mut meta = metadata();
        meta.page_number = Some(42);
        meta.chapter = Some("3".to_string());
        assert_eq!(build_citation(&meta), "Boericke Materia Medica - Page 42");
    }

    #[test]
    fn test_citation_falls_back_to_chapter() {
        let mut meta = metadata();
        meta.chapter = Some("Aconite".to_string());
        assert_eq!(build_citation(&meta), "Boericke Materia Medica - Chapter Aconite");
    }

    #[test]
    fn test_citation_falls_back_to_section() {
        assert_eq!(build_citation(&metadata()), "Boericke Materia Medica - Section 3/10");
    }

    #[test]
    fn test_citation_fixed_at_creation() {
        let chunk = Chunk::new("ACONITUM NAPELLUS.\nFear of death.", metadata());
        assert_eq!(chunk.citation(), Some("Boericke Materia Medica - Section 3/10"));
        assert_eq!(chunk.id(), "data/Boericke_Materia_Medica.txt:2");

        let restored = Chunk::restore(chunk.text(), chunk.metadata().clone(), Some("legacy label".into()));
        assert_eq!(restored.citation(), Some("legacy label"));

        let blank = Chunk::restore("text", metadata(), Some("  ".into()));
        assert_eq!(blank.citation(), None);
    }
}
