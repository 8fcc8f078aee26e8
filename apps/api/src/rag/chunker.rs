//! Document chunking.
//!
//! Sizes are measured in characters. The default sliding window starts a
//! window every `chunk_size - overlap` characters and every window except the
//! last is full, so dropping the first `overlap` characters of each later
//! chunk and concatenating reproduces the source text exactly.
//!
//! The section and page strategies first cut the text at resume section
//! headings or page boundaries, then window only the pieces longer than
//! `chunk_size`.

use std::str::FromStr;

use tracing::debug;

use crate::errors::PipelineError;
use crate::extract::ExtractedText;
use crate::extraction::offline::{section_heading, LEADING_SECTION};
use crate::models::document::{Chunk, PageRange};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkStrategy {
    #[default]
    SlidingWindow,
    Sections,
    Pages,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::SlidingWindow => "sliding",
            ChunkStrategy::Sections => "sections",
            ChunkStrategy::Pages => "pages",
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding" | "sliding_window" | "window" => Ok(ChunkStrategy::SlidingWindow),
            "sections" | "section" => Ok(ChunkStrategy::Sections),
            "pages" | "page" => Ok(ChunkStrategy::Pages),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown CHUNK_STRATEGY '{other}'"
            ))),
        }
    }
}

/// A window over the source text, in char offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

pub fn chunk_spans(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<ChunkSpan>, PipelineError> {
    validate(chunk_size, overlap)?;
    if text.trim().is_empty() {
        return Ok(vec![]);
    }

    let chars: Vec<char> = text.chars().collect();
    Ok(window_spans(0, chars.len(), chunk_size, overlap)
        .into_iter()
        .map(|(start, end)| ChunkSpan {
            start,
            end,
            text: chars[start..end].iter().collect(),
        })
        .collect())
}

/// Windows over `[start, end)`; requires `start < end`.
fn window_spans(start: usize, end: usize, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let step = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut pos = start;
    loop {
        let stop = (pos + chunk_size).min(end);
        spans.push((pos, stop));
        if stop == end {
            break;
        }
        pos += step;
    }
    spans
}

fn validate(chunk_size: usize, overlap: usize) -> Result<(), PipelineError> {
    if chunk_size == 0 {
        return Err(PipelineError::InvalidConfig(
            "chunk size must be greater than 0".to_string(),
        ));
    }
    if overlap >= chunk_size {
        return Err(PipelineError::InvalidConfig(format!(
            "overlap ({overlap}) must be smaller than chunk size ({chunk_size})"
        )));
    }
    Ok(())
}

/// A contiguous piece of the text that is windowed on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    start: usize,
    end: usize,
    section: Option<&'static str>,
}

impl Segment {
    fn len(&self) -> usize {
        self.end - self.start
    }

    /// Shrinks the segment to exclude surrounding whitespace; `None` when nothing is left.
    fn trimmed(mut self, chars: &[char]) -> Option<Self> {
        while self.start < self.end && chars[self.start].is_whitespace() {
            self.start += 1;
        }
        while self.end > self.start && chars[self.end - 1].is_whitespace() {
            self.end -= 1;
        }
        (self.start < self.end).then_some(self)
    }
}

/// Splits at section heading lines; each heading starts its own segment.
/// Returns `None` when the text has no recognizable heading.
fn section_segments(text: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = Segment {
        start: 0,
        end: 0,
        section: Some(LEADING_SECTION),
    };
    let mut found_heading = false;
    let mut offset = 0;
    for line in text.split('\n') {
        if let Some(name) = section_heading(line) {
            found_heading = true;
            current.end = offset;
            segments.push(current);
            current = Segment {
                start: offset,
                end: 0,
                section: Some(name),
            };
        }
        offset += line.chars().count() + 1;
    }
    current.end = text.chars().count();
    segments.push(current);
    found_heading.then_some(segments)
}

/// A segment shorter than `min_len` absorbs the one after it and keeps its
/// own label; a short trailing segment joins its predecessor.
fn merge_short(segments: Vec<Segment>, min_len: usize) -> Vec<Segment> {
    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for segment in segments {
        match merged.last_mut() {
            Some(last) if last.len() < min_len => last.end = segment.end,
            _ => merged.push(segment),
        }
    }
    if merged.len() > 1 && merged[merged.len() - 1].len() < min_len {
        if let Some(tail) = merged.pop() {
            if let Some(last) = merged.last_mut() {
                last.end = tail.end;
            }
        }
    }
    merged
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
    strategy: ChunkStrategy,
    min_chunk_size: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, PipelineError> {
        validate(chunk_size, overlap)?;
        Ok(Self {
            chunk_size,
            overlap,
            strategy: ChunkStrategy::SlidingWindow,
            min_chunk_size: 0,
        })
    }

    /// Switches the cutting strategy. `min_chunk_size` only applies to the
    /// section and page strategies, where shorter pieces are merged.
    pub fn with_strategy(mut self, strategy: ChunkStrategy, min_chunk_size: usize) -> Self {
        self.strategy = strategy;
        self.min_chunk_size = min_chunk_size;
        self
    }

    /// Chunks a document's normalized text. Ids are `"{document_id}:{order}"`.
    pub fn chunk_document(
        &self,
        document_id: &str,
        extracted: &ExtractedText,
    ) -> Result<Vec<Chunk>, PipelineError> {
        validate(self.chunk_size, self.overlap)?;
        let text = &extracted.text;
        if text.trim().is_empty() {
            return Ok(vec![]);
        }
        let chars: Vec<char> = text.chars().collect();
        let whole = vec![Segment {
            start: 0,
            end: chars.len(),
            section: None,
        }];

        let segments = match self.strategy {
            ChunkStrategy::SlidingWindow => whole,
            ChunkStrategy::Sections => match section_segments(text) {
                Some(sections) => self.tidy(sections, &chars),
                None => {
                    debug!("No section headings in {document_id}; using the sliding window");
                    whole
                }
            },
            ChunkStrategy::Pages => {
                let pages = extracted
                    .page_spans()
                    .into_iter()
                    .map(|(start, end)| Segment {
                        start,
                        end,
                        section: None,
                    })
                    .collect();
                self.tidy(pages, &chars)
            }
        };

        let mut chunks = Vec::new();
        for segment in segments {
            for (start, end) in window_spans(segment.start, segment.end, self.chunk_size, self.overlap) {
                let order = chunks.len();
                chunks.push(Chunk {
                    id: format!("{document_id}:{order}"),
                    text: chars[start..end].iter().collect(),
                    source_document_id: document_id.to_string(),
                    page_range: PageRange {
                        start: extracted.page_at(start),
                        end: extracted.page_at(end.saturating_sub(1)),
                    },
                    order,
                    start_offset: start,
                    end_offset: end,
                    section: segment.section.map(str::to_string),
                });
            }
        }
        Ok(chunks)
    }

    fn tidy(&self, segments: Vec<Segment>, chars: &[char]) -> Vec<Segment> {
        let trimmed = segments
            .into_iter()
            .filter_map(|segment| segment.trimmed(chars))
            .collect();
        merge_short(trimmed, self.min_chunk_size)
    }

    pub fn strategy(&self) -> ChunkStrategy {
        self.strategy
    }
}

/// Inverse of sliding-window chunking: concatenates chunks, dropping each later chunk's overlap.
pub fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
    let mut text = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            text.push_str(&chunk.text);
        } else {
            text.extend(chunk.text.chars().skip(overlap));
        }
    }
    text
}
