//! Sequences text extraction, chunking, indexing, model selection and
//! structured extraction for one document, and serves questions and
//! searches over processed documents.
//!
//! It is the only component that decides cross-component fallbacks: a failed
//! embedding leaves the document unindexed (keyword retrieval later), while
//! unreadable input is returned to the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::embedding::EmbeddingProvider;
use crate::errors::PipelineError;
use crate::extract::{ExtractedText, TextExtractor};
use crate::extraction::extractor::{ExtractionOutcome, ExtractionProvenance, StructuredExtractor};
use crate::extraction::selector::{
    detect_complexity, Complexity, ModelChoice, ModelRoute, ModelSelector, ModelTier,
};
use crate::llm_client::{BackendRegistry, BackendStatus};
use crate::models::document::{Chunk, Document, IndexEntry, ScoredChunk};
use crate::models::resume::ResumeRecord;
use crate::rag::answerer::{AnswerContext, RagAnswer, RagAnswerer, RetrievalMode};
use crate::rag::chunker::{ChunkStrategy, Chunker};
use crate::rag::index::{DocumentLocks, VectorIndex};
use crate::rag::keyword::keyword_search;

/// Models used for answering questions; answers are short.
const ANSWER_TIER: ModelTier = ModelTier::Balanced;

/// Per-document state kept after processing.
#[derive(Debug)]
pub struct DocumentSession {
    pub document_id: String,
    pub file_name: Option<String>,
    pub extracted: ExtractedText,
    pub chunks: Vec<Chunk>,
    pub model_choice: ModelChoice,
    pub complexity: Complexity,
    pub outcome: ExtractionOutcome,
    /// False when embedding failed or is disabled; retrieval then uses keywords.
    pub indexed: bool,
    pub processed_at: DateTime<Utc>,
}

/// Result of `process_document`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedDocument {
    pub document_id: String,
    pub file_name: Option<String>,
    pub record: ResumeRecord,
    pub model_choice: ModelChoice,
    pub complexity: Complexity,
    pub provenance: ExtractionProvenance,
    pub page_count: usize,
    pub chunk_count: usize,
    pub indexed: bool,
    pub processed_at: DateTime<Utc>,
}

impl From<&DocumentSession> for ProcessedDocument {
    fn from(session: &DocumentSession) -> Self {
        Self {
            document_id: session.document_id.clone(),
            file_name: session.file_name.clone(),
            record: session.outcome.record.clone(),
            model_choice: session.model_choice.clone(),
            complexity: session.complexity,
            provenance: session.outcome.provenance.clone(),
            page_count: session.extracted.page_count(),
            chunk_count: session.chunks.len(),
            indexed: session.indexed,
            processed_at: session.processed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub mode: RetrievalMode,
    pub hits: Vec<ScoredChunk>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingStatus {
    pub id: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub llm: Vec<BackendStatus>,
    pub embedding: Option<EmbeddingStatus>,
    pub index_kind: &'static str,
    pub index_dimension: usize,
    pub documents: usize,
}

pub struct Orchestrator {
    text_extractor: Arc<dyn TextExtractor>,
    chunker: Chunker,
    embedder: Option<EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    backends: Arc<BackendRegistry>,
    selector: ModelSelector,
    extractor: StructuredExtractor,
    answerer: RagAnswerer,
    locks: DocumentLocks,
    sessions: RwLock<HashMap<String, Arc<DocumentSession>>>,
}

impl Orchestrator {
    pub fn new(
        config: &PipelineConfig,
        text_extractor: Arc<dyn TextExtractor>,
        embedder: Option<EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        backends: BackendRegistry,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if let Some(embedder) = &embedder {
            if embedder.dimension() != index.dimension() {
                return Err(PipelineError::InvalidConfig(format!(
                    "embedding dimension {} ({}) does not match index dimension {} ({})",
                    embedder.dimension(),
                    embedder.id(),
                    index.dimension(),
                    index.kind()
                )));
            }
        }

        let backends = Arc::new(backends);
        let policy = config.call_policy();
        Ok(Self {
            text_extractor,
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap)?
                .with_strategy(config.chunk_strategy, config.min_chunk_size),
            embedder,
            index,
            selector: ModelSelector::new(config.selection.clone())?,
            extractor: StructuredExtractor::new(
                backends.clone(),
                policy,
                config.extraction_options(),
            ),
            answerer: RagAnswerer::new(
                backends.clone(),
                policy,
                config.answer_options(),
                config.rag_top_k,
            )?,
            backends,
            locks: DocumentLocks::default(),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Document processing
    // ────────────────────────────────────────────────────────────────────────

    /// Runs the full pipeline for one document and returns its record.
    ///
    /// Re-processing an id replaces the previous session and index entries.
    /// Only unreadable input and configuration errors are returned.
    pub async fn process_document(
        &self,
        document: Document,
    ) -> Result<ProcessedDocument, PipelineError> {
        let _guard = self.locks.acquire(&document.id).await;
        let Document {
            id: document_id,
            file_name,
            doc_type,
            bytes,
        } = document;

        let extractor = self.text_extractor.clone();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes, doc_type))
            .await
            .map_err(|e| {
                PipelineError::CorruptDocument(format!("text extraction task failed: {e}"))
            })??;
        if extracted.is_empty() {
            return Err(PipelineError::CorruptDocument(
                "no extractable text".to_string(),
            ));
        }
        info!(
            "Extracted {} pages ({} chars) from {} ({:?})",
            extracted.page_count(),
            extracted.text.chars().count(),
            document_id,
            doc_type
        );

        let chunks = self.chunker.chunk_document(&document_id, &extracted)?;
        log_chunk_stats(&document_id, self.chunker.strategy(), &chunks);

        let entries = self.embed_chunks(&document_id, &chunks).await?;

        let available = self.backends.available_ids().await;
        let complexity = detect_complexity(&extracted.text);
        let size = extracted.text.chars().count();
        let model_choice = self.selector.select(size, complexity, &available);
        let fallbacks = self.selector.fallback_routes(&model_choice, &available);
        info!(
            "Selected {}/{} for {} ({})",
            model_choice.backend_id, model_choice.model_name, document_id, model_choice.reason
        );

        let outcome = self
            .extractor
            .extract(&extracted.text, &model_choice, &fallbacks)
            .await?;

        // Index and session change together. The session lock is taken first so
        // that nothing awaits between the index swap and the session insert.
        let mut sessions = self.sessions.write().await;
        let indexed = self.commit_entries(&document_id, entries).await?;
        let session = Arc::new(DocumentSession {
            document_id: document_id.clone(),
            file_name,
            extracted,
            chunks,
            model_choice,
            complexity,
            outcome,
            indexed,
            processed_at: Utc::now(),
        });
        let processed = ProcessedDocument::from(session.as_ref());
        sessions.insert(document_id, session);
        Ok(processed)
    }

    /// Embeds every chunk. `None` when embeddings are disabled or failed.
    async fn embed_chunks(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<Option<Vec<IndexEntry>>, PipelineError> {
        let Some(embedder) = &self.embedder else {
            return Ok(None);
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) => Ok(Some(
                chunks
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexEntry::new(chunk, vector))
                    .collect(),
            )),
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                warn!(
                    "Embedding failed for {} ({}); answers will use keyword search",
                    document_id, e
                );
                Ok(None)
            }
        }
    }

    /// Swaps the document's index entries in one step, or clears them when
    /// there is nothing to index. Returns whether the document ended up indexed.
    async fn commit_entries(
        &self,
        document_id: &str,
        entries: Option<Vec<IndexEntry>>,
    ) -> Result<bool, PipelineError> {
        let Some(entries) = entries else {
            self.drop_stale_entries(document_id).await?;
            return Ok(false);
        };

        let count = entries.len();
        match self.index.replace_document(document_id, entries).await {
            Ok(()) => {
                info!(
                    "Indexed {} chunks of {} in {} index",
                    count,
                    document_id,
                    self.index.kind()
                );
                Ok(true)
            }
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                warn!(
                    "Index write failed for {} ({}); answers will use keyword search",
                    document_id, e
                );
                self.drop_stale_entries(document_id).await?;
                Ok(false)
            }
        }
    }

    /// Removes entries left by an earlier run so they cannot mix with the new text.
    async fn drop_stale_entries(&self, document_id: &str) -> Result<(), PipelineError> {
        match self.index.clear(Some(document_id)).await {
            Ok(removed) => {
                if removed > 0 {
                    debug!("Dropped {} stale entries of {}", removed, document_id);
                }
                Ok(())
            }
            Err(e) if e.is_terminal() => Err(e),
            Err(e) => {
                warn!("Could not clear stale entries of {}: {}", document_id, e);
                Ok(())
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Questions, search, export
    // ────────────────────────────────────────────────────────────────────────

    /// Answers `question` from the chunks of a processed document.
    pub async fn ask(&self, document_id: &str, question: &str) -> Result<RagAnswer, PipelineError> {
        let session = self.session(document_id).await?;
        let routes = self.answer_routes().await;
        let ctx = AnswerContext {
            index: self.index.as_ref(),
            embedder: self.embedder.as_ref().filter(|_| session.indexed),
            document_id,
            chunks: &session.chunks,
            routes: &routes,
        };
        self.answerer.answer(question, &ctx).await
    }

    /// Top-`k` chunks for `query`, across all documents or within one.
    pub async fn search(
        &self,
        query: &str,
        document_id: Option<&str>,
        k: usize,
    ) -> Result<SearchResults, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::InvalidArgument("query is empty".into()));
        }
        if k == 0 {
            return Err(PipelineError::InvalidArgument(
                "k must be greater than zero".into(),
            ));
        }
        if let Some(doc) = document_id {
            self.session(doc).await?;
        }

        if let Some(embedder) = &self.embedder {
            match self.vector_search(embedder, query, document_id, k).await {
                Ok(Some(hits)) => {
                    return Ok(SearchResults {
                        query: query.to_string(),
                        mode: RetrievalMode::Vector,
                        hits,
                    })
                }
                Ok(None) => {}
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!("Vector search failed ({}); using keyword search", e),
            }
        }

        let sessions = self.sessions.read().await;
        let mut chunks: Vec<Chunk> = sessions
            .values()
            .filter(|s| document_id.map_or(true, |doc| s.document_id == doc))
            .flat_map(|s| s.chunks.iter().cloned())
            .collect();
        drop(sessions);
        chunks.sort_by(|a, b| {
            a.source_document_id
                .cmp(&b.source_document_id)
                .then(a.order.cmp(&b.order))
        });
        Ok(SearchResults {
            query: query.to_string(),
            mode: RetrievalMode::Keyword,
            hits: keyword_search(&chunks, query, k),
        })
    }

    async fn vector_search(
        &self,
        embedder: &EmbeddingProvider,
        query: &str,
        document_id: Option<&str>,
        k: usize,
    ) -> Result<Option<Vec<ScoredChunk>>, PipelineError> {
        if self.index.count(document_id).await? == 0 {
            return Ok(None);
        }
        let vector = embedder.embed_query(query).await?;
        let hits = self
            .index
            .query(&vector, k, document_id)
            .await?
            .into_iter()
            .map(|(entry, score)| ScoredChunk {
                chunk: entry.chunk,
                score,
            })
            .collect();
        Ok(Some(hits))
    }

    /// Pretty-printed record JSON, keys in schema order.
    pub async fn export_json(&self, document_id: &str) -> Result<String, PipelineError> {
        let session = self.session(document_id).await?;
        session
            .outcome
            .record
            .to_export_json()
            .map_err(|e| PipelineError::SchemaValidationFailed(e.to_string()))
    }

    pub async fn processed(&self, document_id: &str) -> Result<ProcessedDocument, PipelineError> {
        let session = self.session(document_id).await?;
        Ok(ProcessedDocument::from(session.as_ref()))
    }

    /// Drops a document's session and index entries. Returns false for unknown ids.
    pub async fn forget(&self, document_id: &str) -> Result<bool, PipelineError> {
        let _guard = self.locks.acquire(document_id).await;
        let mut sessions = self.sessions.write().await;
        let removed = self.index.clear(Some(document_id)).await?;
        let existed = sessions.remove(document_id).is_some();
        info!(
            "Forgot document {} ({} index entries removed)",
            document_id, removed
        );
        Ok(existed)
    }

    pub async fn has_document(&self, document_id: &str) -> bool {
        self.sessions.read().await.contains_key(document_id)
    }

    pub async fn status(&self) -> PipelineStatus {
        PipelineStatus {
            llm: self.backends.status().await,
            embedding: self.embedder.as_ref().map(|e| EmbeddingStatus {
                id: e.id().to_string(),
                dimension: e.dimension(),
            }),
            index_kind: self.index.kind(),
            index_dimension: self.index.dimension(),
            documents: self.sessions.read().await.len(),
        }
    }

    async fn session(&self, document_id: &str) -> Result<Arc<DocumentSession>, PipelineError> {
        self.sessions
            .read()
            .await
            .get(document_id)
            .cloned()
            .ok_or_else(|| {
                PipelineError::InvalidArgument(format!("unknown document id '{document_id}'"))
            })
    }

    async fn answer_routes(&self) -> Vec<ModelRoute> {
        let available = self.backends.available_ids().await;
        self.selector.routes_for_tier(ANSWER_TIER, &available)
    }
}

fn log_chunk_stats(document_id: &str, strategy: ChunkStrategy, chunks: &[Chunk]) {
    let total: usize = chunks.iter().map(|c| c.text.chars().count()).sum();
    let average = if chunks.is_empty() {
        0
    } else {
        total / chunks.len()
    };
    info!(
        "Chunked {} into {} chunks with {} strategy (avg {} chars, total {} chars)",
        document_id,
        chunks.len(),
        strategy.as_str(),
        average,
        total
    );

    let mut by_section: BTreeMap<&str, usize> = BTreeMap::new();
    for chunk in chunks {
        if let Some(section) = chunk.section.as_deref() {
            *by_section.entry(section).or_default() += 1;
        }
    }
    if !by_section.is_empty() {
        debug!("Section distribution for {}: {:?}", document_id, by_section);
    }
}
