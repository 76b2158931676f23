//! PDF text extraction
//!
//! Extracts text page by page with lopdf. Every page is prefixed with a
//! `--- Page N ---` marker so that page numbers survive chunking and can be
//! recovered by the page extractor.

use crate::errors::IngestionError;
use lopdf::content::{Content, Operation};
use lopdf::Object;
use std::path::Path;
use tracing::{debug, warn};

/// Extract the text of every page, each behind its page marker
pub fn extract_text_from_pdf(path: &Path) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load(path).map_err(|e| IngestionError::PdfParse {
        path: path.display().to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    let mut extracted_pages = 0usize;

    for (page_num, page_id) in pages {
        let content = match doc.get_page_content(page_id) {
            Ok(content) => content,
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to read page content, skipping");
                continue;
            }
        };

        let page_text = match extract_text_from_content(&content) {
            Ok(raw) => normalize_page_text(&raw),
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to decode page content, skipping");
                continue;
            }
        };
        if page_text.is_empty() {
            continue;
        }

        text.push_str(&page_marker(page_num));
        text.push('\n');
        text.push_str(&page_text);
        text.push_str("\n\n");
        extracted_pages += 1;
    }

    if extracted_pages == 0 {
        return Err(IngestionError::PdfParse {
            path: path.display().to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    debug!(extracted_pages, chars = text.len(), "Text extraction complete");
    Ok(text)
}

pub fn page_marker(page_num: u32) -> String {
    format!("--- Page {} ---", page_num)
}

/// TJ kerning beyond this many thousandths of an em reads as a word gap
const TJ_SPACE_THRESHOLD: f32 = -200.0;

/// Text shown between BT and ET operators of a content stream
///
/// Positioning operators start a new line so that the layout survives as
/// line breaks for the splitter.
fn extract_text_from_content(content: &[u8]) -> Result<String, lopdf::Error> {
    let operations = Content::decode(content)?.operations;
    let mut text = String::new();
    let mut in_text_block = false;
    let mut current = String::new();

    for Operation { operator, operands } in &operations {
        match operator.as_str() {
            "BT" => in_text_block = true,
            "ET" => {
                in_text_block = false;
                if !current.is_empty() {
                    text.push_str(&current);
                    text.push('\n');
                    current.clear();
                }
            }
            "Td" | "TD" | "T*" if in_text_block => {
                if !current.is_empty() && !current.ends_with('\n') {
                    current.push('\n');
                }
            }
            "Tj" | "'" | "\"" | "TJ" if in_text_block => {
                // ' and " move to the next line before showing
                if matches!(operator.as_str(), "'" | "\"") && !current.is_empty() {
                    current.push('\n');
                }
                for operand in operands {
                    push_shown_text(&mut current, operand);
                }
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        text.push_str(&current);
    }
    Ok(text)
}

/// Append the text of one show-text operand; arrays are TJ element lists
fn push_shown_text(out: &mut String, operand: &Object) {
    match operand {
        Object::String(bytes, _) => out.push_str(&decode_pdf_bytes(bytes)),
        Object::Array(elements) => {
            for element in elements {
                match element {
                    Object::String(bytes, _) => out.push_str(&decode_pdf_bytes(bytes)),
                    other => {
                        let gap = other.as_float().is_ok_and(|k| k < TJ_SPACE_THRESHOLD);
                        if gap && !out.ends_with(' ') {
                            out.push(' ');
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

/// Decode a string operand: UTF-16BE when it carries a BOM, Latin-1 otherwise
fn decode_pdf_bytes(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}

/// Collapse runs of spaces inside lines while keeping the line structure
fn normalize_page_text(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .replace('\u{FEFF}', "")
                .replace(['\u{201C}', '\u{201D}'], "\"")
                .replace(['\u{2018}', '\u{2019}'], "'")
        })
        .collect();

    lines.join("\n").trim().to_string()
}
