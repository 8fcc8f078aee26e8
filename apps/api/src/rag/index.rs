//! Vector index abstraction and the in-memory implementation.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::embedding::cosine_similarity;
use crate::errors::PipelineError;
use crate::models::document::IndexEntry;

/// Storage for `(chunk, vector, metadata)` entries with cosine top-k search.
///
/// Entries are keyed by chunk id. Query results are ordered by descending
/// score, with ties broken by original insertion order.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> &'static str;

    fn dimension(&self) -> usize;

    /// Inserts or replaces entries by chunk id.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError>;

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<(IndexEntry, f32)>, PipelineError>;

    /// Removes every entry, or only those of one document. Returns the number removed.
    async fn clear(&self, document_id: Option<&str>) -> Result<u64, PipelineError>;

    /// Swaps all entries of `document_id` for `entries` atomically: concurrent
    /// readers see either the old set or the new one, never a mix.
    async fn replace_document(
        &self,
        document_id: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), PipelineError>;

    async fn count(&self, document_id: Option<&str>) -> Result<usize, PipelineError>;
}

/// Checks entries against the index dimension and, optionally, a document id.
pub fn validate_entries(
    entries: &[IndexEntry],
    dimension: usize,
    document_id: Option<&str>,
) -> Result<(), PipelineError> {
    for entry in entries {
        if entry.vector.len() != dimension {
            return Err(PipelineError::InvalidArgument(format!(
                "entry {} has dimension {}, index expects {}",
                entry.chunk.id,
                entry.vector.len(),
                dimension
            )));
        }
        if let Some(doc) = document_id {
            if entry.metadata.source_document_id != doc {
                return Err(PipelineError::InvalidArgument(format!(
                    "entry {} belongs to document {}, not {}",
                    entry.chunk.id, entry.metadata.source_document_id, doc
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_query(vector: &[f32], k: usize, dimension: usize) -> Result<(), PipelineError> {
    if k == 0 {
        return Err(PipelineError::InvalidArgument(
            "k must be greater than 0".to_string(),
        ));
    }
    if vector.len() != dimension {
        return Err(PipelineError::InvalidArgument(format!(
            "query vector has dimension {}, index expects {}",
            vector.len(),
            dimension
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory index
// ────────────────────────────────────────────────────────────────────────────

struct StoredEntry {
    entry: IndexEntry,
    seq: u64,
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<String, StoredEntry>,
    next_seq: u64,
}

impl IndexState {
    fn insert(&mut self, entry: IndexEntry) {
        let seq = match self.entries.get(&entry.chunk.id) {
            Some(existing) => existing.seq,
            None => {
                self.next_seq += 1;
                self.next_seq
            }
        };
        self.entries
            .insert(entry.chunk.id.clone(), StoredEntry { entry, seq });
    }

    fn remove_document(&mut self, document_id: &str) -> u64 {
        let before = self.entries.len();
        self.entries
            .retain(|_, stored| stored.entry.metadata.source_document_id != document_id);
        (before - self.entries.len()) as u64
    }
}

/// Brute-force cosine index held in process memory.
pub struct MemoryIndex {
    dimension: usize,
    state: RwLock<IndexState>,
}

impl MemoryIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: RwLock::new(IndexState::default()),
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), PipelineError> {
        validate_entries(&entries, self.dimension, None)?;
        let count = entries.len();
        let mut state = self.state.write().await;
        for entry in entries {
            state.insert(entry);
        }
        debug!("Upserted {} index entries", count);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        document_id: Option<&str>,
    ) -> Result<Vec<(IndexEntry, f32)>, PipelineError> {
        validate_query(vector, k, self.dimension)?;
        let state = self.state.read().await;

        let mut scored: Vec<(f32, u64, &IndexEntry)> = state
            .entries
            .values()
            .filter(|stored| {
                document_id.map_or(true, |doc| stored.entry.metadata.source_document_id == doc)
            })
            .map(|stored| {
                (
                    cosine_similarity(vector, &stored.entry.vector),
                    stored.seq,
                    &stored.entry,
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, _, entry)| (entry.clone(), score))
            .collect())
    }

    async fn clear(&self, document_id: Option<&str>) -> Result<u64, PipelineError> {
        let mut state = self.state.write().await;
        let removed = match document_id {
            Some(doc) => state.remove_document(doc),
            None => {
                let n = state.entries.len() as u64;
                state.entries.clear();
                n
            }
        };
        debug!("Cleared {} index entries", removed);
        Ok(removed)
    }

    async fn replace_document(
        &self,
        document_id: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), PipelineError> {
        validate_entries(&entries, self.dimension, Some(document_id))?;
        let count = entries.len();
        let mut state = self.state.write().await;
        let removed = state.remove_document(document_id);
        for entry in entries {
            state.insert(entry);
        }
        debug!(
            "Replaced {} entries of document {} with {}",
            removed, document_id, count
        );
        Ok(())
    }

    async fn count(&self, document_id: Option<&str>) -> Result<usize, PipelineError> {
        let state = self.state.read().await;
        Ok(match document_id {
            Some(doc) => state
                .entries
                .values()
                .filter(|stored| stored.entry.metadata.source_document_id == doc)
                .count(),
            None => state.entries.len(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-document writer locks
// ────────────────────────────────────────────────────────────────────────────

/// Serializes writers of the same document; different documents never contend.
#[derive(Default)]
pub struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    pub async fn acquire(&self, document_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(document_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}
