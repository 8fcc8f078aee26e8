//! Keyword retrieval used when vectors are unavailable, plus the sentence
//! picker behind the offline extractive answer.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::document::{Chunk, ScoredChunk};

const STOPWORDS: &[&str] = &[
    "a", "about", "an", "and", "any", "are", "as", "at", "be", "been", "by", "can", "did", "do",
    "does", "for", "from", "has", "have", "he", "her", "his", "how", "i", "in", "is", "it", "its",
    "many", "much", "of", "on", "or", "she", "that", "the", "their", "them", "they", "this", "to",
    "was", "what", "when", "where", "which", "who", "whom", "why", "with", "you", "your",
];

/// Lower-cased word tokens with a light plural strip.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '#')))
        .filter(|t| !t.is_empty())
        .map(|t| stem(&t.to_lowercase()))
        .collect()
}

fn stem(token: &str) -> String {
    if STOPWORDS.contains(&token) {
        return token.to_string();
    }
    if token.len() > 3 && token.ends_with('s') && !token.ends_with("ss") {
        token[..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

/// Distinct non-stopword terms of a query, in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of `terms` present in `text`.
pub fn term_coverage(text: &str, terms: &[String]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(text).into_iter().collect();
    let matched = terms.iter().filter(|t| tokens.contains(*t)).count();
    matched as f32 / terms.len() as f32
}

/// Ranks chunks by term coverage. Chunks matching nothing are left out; ties
/// keep document order.
pub fn keyword_search(chunks: &[Chunk], query: &str, k: usize) -> Vec<ScoredChunk> {
    let terms = query_terms(query);
    let mut hits: Vec<ScoredChunk> = chunks
        .iter()
        .map(|chunk| ScoredChunk {
            score: term_coverage(&chunk.text, &terms),
            chunk: chunk.clone(),
        })
        .filter(|hit| hit.score > 0.0)
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.source_document_id.cmp(&b.chunk.source_document_id))
            .then_with(|| a.chunk.order.cmp(&b.chunk.order))
    });
    hits.truncate(k);
    hits
}

/// Splits text into sentences at `.`, `!` or `?` followed by whitespace, and at line breaks.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, next)| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let end = i + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}

/// The `max` sentences with the most query-term overlap, best first.
pub fn best_sentences(chunks: &[&Chunk], query: &str, max: usize) -> Vec<String> {
    let terms = query_terms(query);
    let mut seen = HashSet::new();
    let mut scored: Vec<(f32, usize, &str)> = chunks
        .iter()
        .flat_map(|chunk| sentences(&chunk.text))
        .filter(|s| seen.insert(s.to_lowercase()))
        .enumerate()
        .map(|(pos, s)| (term_coverage(s, &terms), pos, s))
        .filter(|(score, _, _)| *score > 0.0)
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    scored
        .into_iter()
        .take(max)
        .map(|(_, _, s)| s.to_string())
        .collect()
}
