//! Document text extraction.
//!
//! Turns uploaded bytes into normalized plain text. Format readers produce one
//! string per page; `ExtractedText` normalizes them, joins them and remembers
//! where each page starts so chunks can report their page range.

pub mod docx;
pub mod pdf;
pub mod text;

use crate::errors::PipelineError;
use crate::models::document::DocumentType;

/// Separator inserted between non-empty pages in the joined text.
pub const PAGE_SEPARATOR: &str = "\n\n";

pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8], doc_type: DocumentType)
        -> Result<ExtractedText, PipelineError>;
}

/// Dispatches on document type to the PDF, DOCX and plain-text readers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentTextExtractor;

impl TextExtractor for DocumentTextExtractor {
    fn extract(
        &self,
        bytes: &[u8],
        doc_type: DocumentType,
    ) -> Result<ExtractedText, PipelineError> {
        let pages = match doc_type {
            DocumentType::Pdf => pdf::extract_pages(bytes)?,
            DocumentType::Docx => docx::extract_pages(bytes)?,
            DocumentType::Txt => text::extract_pages(bytes)?,
        };
        Ok(ExtractedText::from_pages(pages))
    }
}

/// Normalized document text plus per-page bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedText {
    pub pages: Vec<String>,
    pub text: String,
    /// `(char offset in text, 1-based page number)` for every non-empty page.
    page_starts: Vec<(usize, u32)>,
}

impl ExtractedText {
    pub fn from_pages(raw_pages: Vec<String>) -> Self {
        let mut text = String::new();
        let mut char_len = 0usize;
        let mut pages = Vec::with_capacity(raw_pages.len());
        let mut page_starts = Vec::new();

        for (i, raw) in raw_pages.into_iter().enumerate() {
            let page = normalize(&raw);
            if !page.is_empty() {
                if !text.is_empty() {
                    text.push_str(PAGE_SEPARATOR);
                    char_len += PAGE_SEPARATOR.chars().count();
                }
                page_starts.push((char_len, i as u32 + 1));
            }
            char_len += page.chars().count();
            text.push_str(&page);
            pages.push(page);
        }

        Self {
            pages,
            text,
            page_starts,
        }
    }

    /// Single-page text, mostly for callers that already hold plain text.
    pub fn from_text(text: &str) -> Self {
        Self::from_pages(vec![text.to_string()])
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Char spans `[start, end)` of every non-empty page within `text`.
    pub fn page_spans(&self) -> Vec<(usize, usize)> {
        self.page_starts
            .iter()
            .map(|&(start, page)| {
                let len = self.pages[page as usize - 1].chars().count();
                (start, start + len)
            })
            .collect()
    }

    /// 1-based page number containing the character at `offset`.
    pub fn page_at(&self, offset: usize) -> u32 {
        let count = self
            .page_starts
            .partition_point(|&(start, _)| start <= offset);
        match count {
            0 => self.page_starts.first().map(|&(_, page)| page).unwrap_or(1),
            n => self.page_starts[n - 1].1,
        }
    }
}

/// Canonical whitespace: `\n` line endings, no control characters, single
/// spaces inside lines, no trailing spaces, at most one blank line in a row.
pub fn normalize(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = 0usize;

    for line in unified.split('\n') {
        let mut cleaned = String::with_capacity(line.len());
        let mut pending_space = false;
        for c in line.chars() {
            if c.is_whitespace() || c.is_control() {
                // Any whitespace or stray control char inside a line becomes one space.
                pending_space = !cleaned.is_empty();
                continue;
            }
            if pending_space {
                cleaned.push(' ');
                pending_space = false;
            }
            cleaned.push(c);
        }

        if cleaned.is_empty() {
            blank_run += 1;
            if blank_run > 1 || lines.is_empty() {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(cleaned);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}
