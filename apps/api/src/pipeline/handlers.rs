use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::document::{Document, DocumentType};
use crate::pipeline::orchestrator::{PipelineStatus, ProcessedDocument, SearchResults};
use crate::rag::answerer::RagAnswer;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub document_id: Option<String>,
    pub k: Option<usize>,
}

/// POST /api/v1/documents
/// Multipart upload: `file` (required), `document_id` (optional, re-processes).
pub async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ProcessedDocument>, AppError> {
    let mut file: Option<(Option<String>, Option<String>, Bytes)> = None;
    let mut document_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read upload: {e}")))?;
                file = Some((file_name, content_type, bytes));
            }
            "document_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Invalid document_id: {e}")))?;
                document_id = Some(text.trim().to_string()).filter(|id| !id.is_empty());
            }
            _ => {}
        }
    }

    let (file_name, content_type, bytes) =
        file.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".to_string()));
    }
    let doc_type = DocumentType::infer(file_name.as_deref(), content_type.as_deref())?;

    let document = Document::new(document_id, file_name, doc_type, bytes);
    let processed = state.orchestrator.process_document(document).await?;
    Ok(Json(processed))
}

/// GET /api/v1/documents/:id
pub async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProcessedDocument>, AppError> {
    if !state.orchestrator.has_document(&id).await {
        return Err(AppError::NotFound(format!("Document {id} not found")));
    }
    let processed = state.orchestrator.processed(&id).await?;
    Ok(Json(processed))
}

/// POST /api/v1/documents/:id/ask
pub async fn handle_ask(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<RagAnswer>, AppError> {
    if !state.orchestrator.has_document(&id).await {
        return Err(AppError::NotFound(format!("Document {id} not found")));
    }
    let answer = state.orchestrator.ask(&id, &req.question).await?;
    Ok(Json(answer))
}

/// GET /api/v1/documents/:id/export
pub async fn handle_export(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.orchestrator.has_document(&id).await {
        return Err(AppError::NotFound(format!("Document {id} not found")));
    }
    let json = state.orchestrator.export_json(&id).await?;
    let disposition = format!("attachment; filename=\"{}.json\"", sanitize_file_stem(&id));
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        json,
    ))
}

/// DELETE /api/v1/documents/:id
pub async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.orchestrator.forget(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Document {id} not found")))
    }
}

/// POST /api/v1/search
pub async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResults>, AppError> {
    let k = req.k.unwrap_or(state.config.pipeline.rag_top_k);
    if let Some(doc) = &req.document_id {
        if !state.orchestrator.has_document(doc).await {
            return Err(AppError::NotFound(format!("Document {doc} not found")));
        }
    }
    let results = state
        .orchestrator
        .search(&req.query, req.document_id.as_deref(), k)
        .await?;
    Ok(Json(results))
}

/// GET /api/v1/backends
pub async fn handle_backends(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.orchestrator.status().await)
}

/// Keeps header-safe characters of a document id for the download name.
fn sanitize_file_stem(id: &str) -> String {
    let stem: String = id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if stem.is_empty() {
        "resume".to_string()
    } else {
        stem
    }
}
