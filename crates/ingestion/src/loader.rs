//! Document loading for plain-text and PDF sources

use crate::errors::IngestionError;
use crate::pdf::extract_text_from_pdf;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    /// Unrecognized extension, lower-cased
    Other(String),
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => DocumentFormat::PlainText,
            "pdf" => DocumentFormat::Pdf,
            _ => DocumentFormat::Other(ext),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DocumentFormat::Other(_))
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentFormat::PlainText => write!(f, "txt"),
            DocumentFormat::Pdf => write!(f, "pdf"),
            DocumentFormat::Other(ext) if ext.is_empty() => write!(f, "<none>"),
            DocumentFormat::Other(ext) => write!(f, "{}", ext),
        }
    }
}

/// Raw text of one source document plus its source-level metadata
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub book_name: String,
    pub source_document_id: String,
    pub format: DocumentFormat,
}

/// Display title from a file stem: underscores become spaces, whitespace collapsed
pub fn book_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Load a single file
pub fn load_document(path: &Path) -> Result<Document, IngestionError> {
    if !path.is_file() {
        return Err(IngestionError::FileNotFound(path.display().to_string()));
    }

    let format = DocumentFormat::from_path(path);
    let text = match &format {
        DocumentFormat::PlainText => read_text(path)?,
        DocumentFormat::Pdf => extract_text_from_pdf(path)?,
        DocumentFormat::Other(_) => {
            return Err(IngestionError::UnsupportedFormat {
                path: path.display().to_string(),
                format: format.to_string(),
            })
        }
    };

    debug!(path = %path.display(), chars = text.len(), %format, "Loaded document");

    Ok(Document {
        text,
        book_name: book_name_from_path(path),
        source_document_id: path.display().to_string(),
        format,
    })
}

/// UTF-8, falling back to Latin-1
fn read_text(path: &Path) -> Result<String, IngestionError> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => {
            debug!(path = %path.display(), "Not valid UTF-8, decoding as Latin-1");
            Ok(e.into_bytes().into_iter().map(char::from).collect())
        }
    }
}

/// Supported files directly inside `dir`, sorted by path
pub fn discover_documents(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    if !dir.is_dir() {
        return Err(IngestionError::DirectoryNotFound(dir.display().to_string()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths
        .into_iter()
        .filter(|path| {
            let supported = DocumentFormat::from_path(path).is_supported();
            if !supported {
                info!(file = %path.display(), "Skipping unsupported file");
            }
            supported
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_book_name_from_path() {
        assert_eq!(
            book_name_from_path(Path::new("data/Boericke__Materia_Medica.txt")),
            "Boericke Materia Medica"
        );
        assert_eq!(book_name_from_path(Path::new("Kent  Repertory_.pdf")), "Kent Repertory");
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DocumentFormat::from_path(Path::new("a.TXT")), DocumentFormat::PlainText);
        assert_eq!(DocumentFormat::from_path(Path::new("a.pdf")), DocumentFormat::Pdf);
        assert_eq!(
            DocumentFormat::from_path(Path::new("a.epub")),
            DocumentFormat::Other("epub".to_string())
        );
        assert!(!DocumentFormat::from_path(Path::new("README")).is_supported());
    }

    #[test]
    fn test_load_text_with_latin1_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let utf8 = dir.path().join("Kent_Lectures.txt");
        fs::write(&utf8, "Aconit für Angst").unwrap();
        let doc = load_document(&utf8).unwrap();
        assert_eq!(doc.text, "Aconit für Angst");
        assert_eq!(doc.book_name, "Kent Lectures");
        assert_eq!(doc.format, DocumentFormat::PlainText);
        assert_eq!(doc.source_document_id, utf8.display().to_string());

        let latin1 = dir.path().join("clarke.txt");
        fs::write(&latin1, [b'c', b'a', b'f', 0xE9]).unwrap();
        assert_eq!(load_document(&latin1).unwrap().text, "café");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let epub = dir.path().join("book.epub");
        fs::write(&epub, "x").unwrap();
        assert!(matches!(
            load_document(&epub),
            Err(IngestionError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            load_document(&dir.path().join("missing.txt")),
            Err(IngestionError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.txt", "a.pdf", "notes.md", "c.TXT"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.txt")).unwrap();

        let found: Vec<String> = discover_documents(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(found, vec!["a.pdf", "b.txt", "c.TXT"]);

        assert!(matches!(
            discover_documents(&dir.path().join("missing")),
            Err(IngestionError::DirectoryNotFound(_))
        ));
    }
}
