use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;

/// Fixed-dimension embedding of a chunk or a query string.
pub type EmbeddingVector = Vec<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Pdf,
    Docx,
    Txt,
}

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

impl DocumentType {
    /// Infers the type from the file name extension, falling back to the MIME type.
    pub fn infer(file_name: Option<&str>, mime_type: Option<&str>) -> Result<Self, PipelineError> {
        let by_extension = file_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
                "pdf" => Some(DocumentType::Pdf),
                "docx" => Some(DocumentType::Docx),
                "txt" | "text" | "md" => Some(DocumentType::Txt),
                _ => None,
            });
        if let Some(doc_type) = by_extension {
            return Ok(doc_type);
        }

        let mime = mime_type
            .map(|m| m.split(';').next().unwrap_or(m).trim().to_ascii_lowercase())
            .unwrap_or_default();
        match mime.as_str() {
            "application/pdf" => Ok(DocumentType::Pdf),
            DOCX_MIME => Ok(DocumentType::Docx),
            "text/plain" | "text/markdown" => Ok(DocumentType::Txt),
            _ => Err(PipelineError::UnsupportedFormat(format!(
                "cannot process '{}' ({})",
                file_name.unwrap_or("upload"),
                if mime.is_empty() { "no content type" } else { mime.as_str() }
            ))),
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "application/pdf",
            DocumentType::Docx => DOCX_MIME,
            DocumentType::Txt => "text/plain",
        }
    }
}

/// An uploaded document. Lives only until its text has been extracted.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub file_name: Option<String>,
    pub doc_type: DocumentType,
    pub bytes: Bytes,
}

impl Document {
    pub fn new(
        id: Option<String>,
        file_name: Option<String>,
        doc_type: DocumentType,
        bytes: Bytes,
    ) -> Self {
        Self {
            id: id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            file_name,
            doc_type,
            bytes,
        }
    }

    /// Convenience constructor for plain-text content.
    pub fn from_text(id: impl Into<String>, text: &str) -> Self {
        Self::new(
            Some(id.into()),
            None,
            DocumentType::Txt,
            Bytes::copy_from_slice(text.as_bytes()),
        )
    }
}

/// Inclusive, 1-based page span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

/// A bounded span of document text prepared for embedding. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source_document_id: String,
    pub page_range: PageRange,
    pub order: usize,
    /// Character offset of the first character in the normalized document text.
    pub start_offset: usize,
    pub end_offset: usize,
    /// Resume section the chunk was cut from, for section-based chunking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub source_document_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// A stored `(chunk, vector, metadata)` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: EmbeddingVector,
    pub metadata: EntryMetadata,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, vector: EmbeddingVector) -> Self {
        let metadata = EntryMetadata {
            source_document_id: chunk.source_document_id.clone(),
            extra: BTreeMap::new(),
        };
        Self {
            chunk,
            vector,
            metadata,
        }
    }
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_by_extension() {
        assert_eq!(
            DocumentType::infer(Some("cv.PDF"), None).unwrap(),
            DocumentType::Pdf
        );
        assert_eq!(
            DocumentType::infer(Some("resume.docx"), Some("application/octet-stream")).unwrap(),
            DocumentType::Docx
        );
        assert_eq!(
            DocumentType::infer(Some("notes.txt"), None).unwrap(),
            DocumentType::Txt
        );
    }

    #[test]
    fn test_infer_by_mime_when_extension_unknown() {
        assert_eq!(
            DocumentType::infer(Some("upload"), Some("application/pdf")).unwrap(),
            DocumentType::Pdf
        );
        assert_eq!(
            DocumentType::infer(None, Some("text/plain; charset=utf-8")).unwrap(),
            DocumentType::Txt
        );
    }

    #[test]
    fn test_infer_rejects_images() {
        let err = DocumentType::infer(Some("photo.png"), Some("image/png")).unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_document_gets_generated_id() {
        let doc = Document::new(None, None, DocumentType::Txt, Bytes::from_static(b"hi"));
        assert!(Uuid::parse_str(&doc.id).is_ok());
        let doc = Document::new(Some("  ".into()), None, DocumentType::Txt, Bytes::new());
        assert!(!doc.id.trim().is_empty());
    }

    #[test]
    fn test_index_entry_metadata_carries_document_id() {
        let chunk = Chunk {
            id: "doc-1:0".to_string(),
            text: "hello".to_string(),
            source_document_id: "doc-1".to_string(),
            page_range: PageRange { start: 1, end: 1 },
            order: 0,
            start_offset: 0,
            end_offset: 5,
            section: None,
        };
        let entry = IndexEntry::new(chunk, vec![1.0, 0.0]);
        assert_eq!(entry.metadata.source_document_id, "doc-1");
    }
}
