//! Retrieval-augmented answers about one processed document.
//!
//! Retrieval prefers the vector index and falls back to keyword matching over
//! the document's chunks when the document has no vectors or the embedder
//! fails. Generation tries each LLM route in order and ends with an
//! extractive answer built from the retrieved text.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::errors::PipelineError;
use crate::extraction::selector::{ModelRoute, OFFLINE_BACKEND};
use crate::llm_client::prompts::GROUNDING_INSTRUCTION;
use crate::llm_client::{BackendRegistry, CompletionOptions, CompletionRequest};
use crate::models::document::{Chunk, ScoredChunk};
use crate::rag::index::VectorIndex;
use crate::rag::keyword::{best_sentences, keyword_search};
use crate::rag::prompts::{
    CONTEXT_BLOCK_TEMPLATE, INSUFFICIENT_CONTEXT, RAG_PROMPT_TEMPLATE, RAG_SYSTEM,
};
use crate::retry::{call_with_policy, CallPolicy};

/// Sentences used for the offline extractive answer.
const EXTRACTIVE_SENTENCES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Vector,
    Keyword,
}

/// Chunks retrieved for one question.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    pub mode: RetrievalMode,
    pub hits: Vec<ScoredChunk>,
}

impl Retrieval {
    /// Best cosine score for vector hits, best term coverage for keyword hits.
    pub fn confidence(&self) -> Option<f32> {
        self.hits.first().map(|hit| hit.score)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RagAnswer {
    pub question: String,
    pub answer: String,
    pub retrieved_chunks: Vec<ScoredChunk>,
    pub confidence: Option<f32>,
    pub retrieval_mode: RetrievalMode,
    /// Backend that wrote the answer, or `offline` for the extractive answer.
    pub answered_by: String,
}

/// Everything `answer` reads besides the question.
pub struct AnswerContext<'a> {
    pub index: &'a dyn VectorIndex,
    pub embedder: Option<&'a EmbeddingProvider>,
    pub document_id: &'a str,
    /// The document's chunks, searched by keyword when vectors are unavailable.
    pub chunks: &'a [Chunk],
    /// LLM routes to try, in order.
    pub routes: &'a [ModelRoute],
}

#[derive(Clone)]
pub struct RagAnswerer {
    backends: Arc<BackendRegistry>,
    policy: CallPolicy,
    options: CompletionOptions,
    top_k: usize,
}

impl RagAnswerer {
    pub fn new(
        backends: Arc<BackendRegistry>,
        policy: CallPolicy,
        options: CompletionOptions,
        top_k: usize,
    ) -> Result<Self, PipelineError> {
        if top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "RAG top_k must be greater than zero".into(),
            ));
        }
        Ok(Self {
            backends,
            policy,
            options,
            top_k,
        })
    }

    pub async fn answer(
        &self,
        question: &str,
        ctx: &AnswerContext<'_>,
    ) -> Result<RagAnswer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidArgument("question is empty".into()));
        }

        let retrieval = self.retrieve(question, ctx).await?;
        let (answer, answered_by) = if retrieval.hits.is_empty() {
            (INSUFFICIENT_CONTEXT.to_string(), OFFLINE_BACKEND.to_string())
        } else {
            self.generate(question, &retrieval.hits, ctx.routes).await?
        };

        info!(
            "Answered question on {} via {:?} retrieval ({} chunks, answered by {})",
            ctx.document_id,
            retrieval.mode,
            retrieval.hits.len(),
            answered_by
        );
        Ok(RagAnswer {
            question: question.to_string(),
            answer,
            confidence: retrieval.confidence(),
            retrieval_mode: retrieval.mode,
            retrieved_chunks: retrieval.hits,
            answered_by,
        })
    }

    /// Top-k chunks of the document for `question`.
    pub async fn retrieve(
        &self,
        question: &str,
        ctx: &AnswerContext<'_>,
    ) -> Result<Retrieval, PipelineError> {
        if let Some(embedder) = ctx.embedder {
            match self.vector_hits(question, ctx.index, embedder, ctx.document_id).await {
                Ok(Some(hits)) => {
                    return Ok(Retrieval {
                        mode: RetrievalMode::Vector,
                        hits,
                    })
                }
                Ok(None) => debug!(
                    "Document {} has no vectors; using keyword retrieval",
                    ctx.document_id
                ),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!(
                    "Vector retrieval failed for {} ({}); using keyword retrieval",
                    ctx.document_id, e
                ),
            }
        }

        Ok(Retrieval {
            mode: RetrievalMode::Keyword,
            hits: keyword_search(ctx.chunks, question, self.top_k),
        })
    }

    /// `Ok(None)` when the document has nothing in the index.
    async fn vector_hits(
        &self,
        question: &str,
        index: &dyn VectorIndex,
        embedder: &EmbeddingProvider,
        document_id: &str,
    ) -> Result<Option<Vec<ScoredChunk>>, PipelineError> {
        if index.count(Some(document_id)).await? == 0 {
            return Ok(None);
        }
        let vector = embedder.embed_query(question).await?;
        let hits = index
            .query(&vector, self.top_k, Some(document_id))
            .await?
            .into_iter()
            .map(|(entry, score)| ScoredChunk {
                chunk: entry.chunk,
                score,
            })
            .collect();
        Ok(Some(hits))
    }

    async fn generate(
        &self,
        question: &str,
        hits: &[ScoredChunk],
        routes: &[ModelRoute],
    ) -> Result<(String, String), PipelineError> {
        let prompt = build_prompt(question, hits);

        for route in routes {
            let Some(backend) = self.backends.get(&route.backend_id) else {
                continue;
            };
            let request = CompletionRequest {
                model: &route.model_name,
                system: RAG_SYSTEM,
                prompt: &prompt,
                options: self.options,
            };
            let label = format!("answer {}/{}", route.backend_id, route.model_name);
            match call_with_policy(&self.policy, &label, || backend.complete(&request)).await {
                Ok(text) if !text.trim().is_empty() => {
                    return Ok((text.trim().to_string(), route.backend_id.clone()))
                }
                Ok(_) => warn!("{} returned an empty answer", label),
                Err(e) if e.is_terminal() => return Err(e),
                Err(e) => warn!("{} failed ({}); trying next backend", label, e),
            }
        }

        let chunks: Vec<&Chunk> = hits.iter().map(|hit| &hit.chunk).collect();
        let sentences = best_sentences(&chunks, question, EXTRACTIVE_SENTENCES);
        let answer = if sentences.is_empty() {
            INSUFFICIENT_CONTEXT.to_string()
        } else {
            sentences.join(" ")
        };
        Ok((answer, OFFLINE_BACKEND.to_string()))
    }
}

/// Numbered context blocks followed by the question.
pub fn build_prompt(question: &str, hits: &[ScoredChunk]) -> String {
    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            let range = hit.chunk.page_range;
            let pages = if range.start == range.end {
                range.start.to_string()
            } else {
                format!("{}-{}", range.start, range.end)
            };
            CONTEXT_BLOCK_TEMPLATE
                .replace("{n}", &(i + 1).to_string())
                .replace("{pages}", &pages)
                .replace("{text}", &hit.chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    RAG_PROMPT_TEMPLATE
        .replace("{grounding}", GROUNDING_INSTRUCTION)
        .replace("{insufficient}", INSUFFICIENT_CONTEXT)
        .replace("{context}", &context)
        .replace("{question}", question)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hashing::HashingEmbedder;
    use crate::embedding::testing::FailingEmbedder;
    use crate::llm_client::testing::ScriptedBackend;
    use crate::models::document::{IndexEntry, PageRange};
    use crate::rag::index::MemoryIndex;
    use std::time::Duration;

    const DIM: usize = 64;

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_secs(5),
            retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn chunk(doc: &str, order: usize, text: &str) -> Chunk {
        Chunk {
            id: format!("{doc}:{order}"),
            text: text.to_string(),
            source_document_id: doc.to_string(),
            page_range: PageRange { start: 1, end: 1 },
            order,
            start_offset: 0,
            end_offset: text.chars().count(),
            section: None,
        }
    }

    fn chunks() -> Vec<Chunk> {
        vec![
            chunk("doc", 0, "Jane enjoys hiking in the Alps and plays the violin."),
            chunk("doc", 1, "Jane has 5 years of Python experience building data pipelines."),
        ]
    }

    fn hashing() -> EmbeddingProvider {
        EmbeddingProvider::new(Arc::new(HashingEmbedder::new(DIM).unwrap()), policy(), 8)
    }

    async fn indexed(provider: &EmbeddingProvider, chunks: &[Chunk]) -> MemoryIndex {
        let index = MemoryIndex::new(DIM);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = provider.embed(&texts).await.unwrap();
        let entries = chunks
            .iter()
            .cloned()
            .zip(vectors)
            .map(|(c, v)| IndexEntry::new(c, v))
            .collect();
        index.upsert(entries).await.unwrap();
        index
    }

    fn answerer(backends: BackendRegistry) -> RagAnswerer {
        RagAnswerer::new(Arc::new(backends), policy(), CompletionOptions::default(), 5).unwrap()
    }

    fn route(backend: &str) -> ModelRoute {
        ModelRoute {
            backend_id: backend.to_string(),
            model_name: "m".to_string(),
        }
    }

    #[tokio::test]
    async fn test_vector_retrieval_with_llm_answer() {
        let provider = hashing();
        let chunks = chunks();
        let index = indexed(&provider, &chunks).await;
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![Ok("Jane has 5 years of Python experience [2].".to_string())],
        ));
        let routes = [route("ollama")];
        let ctx = AnswerContext {
            index: &index,
            embedder: Some(&provider),
            document_id: "doc",
            chunks: &chunks,
            routes: &routes,
        };

        let answer = answerer(BackendRegistry::new().with(ollama.clone()))
            .answer("How many years of Python experience?", &ctx)
            .await
            .unwrap();

        assert_eq!(answer.retrieval_mode, RetrievalMode::Vector);
        assert_eq!(answer.retrieved_chunks[0].chunk.order, 1);
        assert!(answer.answer.contains("5 years"));
        assert_eq!(answer.answered_by, "ollama");
        assert!(answer.confidence.unwrap() > 0.0);

        let prompt = ollama.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("[1] (pages 1)"));
        assert!(prompt.contains("QUESTION: How many years of Python experience?"));
        assert!(prompt.contains(INSUFFICIENT_CONTEXT));
    }

    #[tokio::test]
    async fn test_extractive_answer_without_backends() {
        let provider = hashing();
        let chunks = chunks();
        let index = indexed(&provider, &chunks).await;
        let ctx = AnswerContext {
            index: &index,
            embedder: Some(&provider),
            document_id: "doc",
            chunks: &chunks,
            routes: &[],
        };

        let answer = answerer(BackendRegistry::new())
            .answer("How many years of Python experience?", &ctx)
            .await
            .unwrap();
        assert_eq!(answer.answered_by, OFFLINE_BACKEND);
        assert!(answer.answer.contains("5 years"), "{}", answer.answer);
    }

    #[tokio::test]
    async fn test_empty_index_falls_back_to_keywords() {
        let provider = hashing();
        let chunks = chunks();
        let index = MemoryIndex::new(DIM);
        let ctx = AnswerContext {
            index: &index,
            embedder: Some(&provider),
            document_id: "doc",
            chunks: &chunks,
            routes: &[],
        };

        let answer = answerer(BackendRegistry::new())
            .answer("How many years of Python experience?", &ctx)
            .await
            .unwrap();
        assert_eq!(answer.retrieval_mode, RetrievalMode::Keyword);
        assert_eq!(answer.retrieved_chunks.len(), 1);
        assert_eq!(answer.confidence, Some(1.0));
        assert!(answer.answer.contains("5 years"));
    }

    #[tokio::test]
    async fn test_failing_embedder_falls_back_to_keywords() {
        let hashing = hashing();
        let chunks = chunks();
        let index = indexed(&hashing, &chunks).await;
        let failing = EmbeddingProvider::new(Arc::new(FailingEmbedder::new(DIM)), policy(), 8);
        let ctx = AnswerContext {
            index: &index,
            embedder: Some(&failing),
            document_id: "doc",
            chunks: &chunks,
            routes: &[],
        };

        let answer = answerer(BackendRegistry::new())
            .answer("python experience", &ctx)
            .await
            .unwrap();
        assert_eq!(answer.retrieval_mode, RetrievalMode::Keyword);
    }

    #[tokio::test]
    async fn test_failed_backend_moves_to_next_route() {
        let chunks = chunks();
        let index = MemoryIndex::new(DIM);
        let ollama = Arc::new(ScriptedBackend::new(
            "ollama",
            vec![Err(PipelineError::BackendUnavailable("down".into()))],
        ));
        let openai = Arc::new(ScriptedBackend::new("openai", vec![Ok("Five years.".to_string())]));
        let routes = [route("ollama"), route("openai")];
        let ctx = AnswerContext {
            index: &index,
            embedder: None,
            document_id: "doc",
            chunks: &chunks,
            routes: &routes,
        };

        let answer = answerer(BackendRegistry::new().with(ollama).with(openai))
            .answer("python experience", &ctx)
            .await
            .unwrap();
        assert_eq!(answer.answered_by, "openai");
        assert_eq!(answer.answer, "Five years.");
    }

    #[tokio::test]
    async fn test_nothing_retrieved_is_insufficient() {
        let chunks = chunks();
        let index = MemoryIndex::new(DIM);
        let ctx = AnswerContext {
            index: &index,
            embedder: None,
            document_id: "doc",
            chunks: &chunks,
            routes: &[],
        };

        let answer = answerer(BackendRegistry::new())
            .answer("What is her salary expectation?", &ctx)
            .await
            .unwrap();
        assert_eq!(answer.answer, INSUFFICIENT_CONTEXT);
        assert!(answer.retrieved_chunks.is_empty());
        assert_eq!(answer.confidence, None);
    }

    #[tokio::test]
    async fn test_empty_question_is_invalid() {
        let index = MemoryIndex::new(DIM);
        let ctx = AnswerContext {
            index: &index,
            embedder: None,
            document_id: "doc",
            chunks: &[],
            routes: &[],
        };
        let err = answerer(BackendRegistry::new())
            .answer("   ", &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[test]
    fn test_zero_top_k_is_invalid_config() {
        let result = RagAnswerer::new(
            Arc::new(BackendRegistry::new()),
            policy(),
            CompletionOptions::default(),
            0,
        );
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }
}
