//! Retrieval subsystem: chunking, the vector index (in memory or pgvector),
//! keyword fallback and grounded question answering.

pub mod answerer;
pub mod chunker;
pub mod index;
pub mod keyword;
pub mod pgvector;
pub mod prompts;
