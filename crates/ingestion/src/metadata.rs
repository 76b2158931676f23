//! Heuristic metadata extraction from chunk text
//!
//! One function per field so each can be swapped or tested on its own.
//! Misses are acceptable: they only cost citation precision, never chunk
//! boundaries.

use regex_lite::Regex;
use std::sync::OnceLock;

pub type PageExtractor = fn(&str) -> Option<u32>;
pub type LabelExtractor = fn(&str) -> Option<String>;

fn page_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)---\s*Page\s*(\d+)\s*---").expect("page pattern is valid")
    })
}

fn chapter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Chapter[: \t]*(\d+|[A-Z][A-Za-z \t]+)").expect("chapter pattern is valid")
    })
}

fn entity_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Z][A-Z \t]+)(?:\n|\.)").expect("entity pattern is valid")
    })
}

/// First `--- Page N ---` marker; page 0 counts as absent
pub fn extract_page_number(text: &str) -> Option<u32> {
    page_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|page| *page > 0)
}

/// Label after the first "Chapter", limited to its own line
pub fn extract_chapter(text: &str) -> Option<String> {
    chapter_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|label| !label.is_empty())
}

/// Upper-case heading that opens the chunk, e.g. "ACONITUM NAPELLUS."
pub fn extract_entity_name(text: &str) -> Option<String> {
    entity_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Per-field extractors applied to every chunk
#[derive(Debug, Clone, Copy)]
pub struct MetadataExtractors {
    pub page: PageExtractor,
    pub chapter: LabelExtractor,
    pub entity: LabelExtractor,
}

impl Default for MetadataExtractors {
    fn default() -> Self {
        Self {
            page: extract_page_number,
            chapter: extract_chapter,
            entity: extract_entity_name,
        }
    }
}
