pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::pipeline::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.config.max_upload_bytes;
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/backends", get(handlers::handle_backends))
        // Documents
        .route("/api/v1/documents", post(handlers::handle_upload))
        .route(
            "/api/v1/documents/:id",
            get(handlers::handle_get_document).delete(handlers::handle_delete),
        )
        .route("/api/v1/documents/:id/ask", post(handlers::handle_ask))
        .route("/api/v1/documents/:id/export", get(handlers::handle_export))
        // Search
        .route("/api/v1/search", post(handlers::handle_search))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::{BackendsConfig, Config, PipelineConfig};
    use crate::embedding::hashing::HashingEmbedder;
    use crate::embedding::EmbeddingProvider;
    use crate::extract::DocumentTextExtractor;
    use crate::llm_client::BackendRegistry;
    use crate::pipeline::Orchestrator;
    use crate::rag::index::MemoryIndex;

    const BOUNDARY: &str = "resume-parser-test-boundary";

    fn test_app() -> Router {
        let pipeline = PipelineConfig::default();
        let embedder = EmbeddingProvider::new(
            Arc::new(HashingEmbedder::new(128).unwrap()),
            pipeline.call_policy(),
            pipeline.embedding_batch_size,
        );
        let orchestrator = Orchestrator::new(
            &pipeline,
            Arc::new(DocumentTextExtractor),
            Some(embedder),
            Arc::new(MemoryIndex::new(128)),
            BackendRegistry::new(),
        )
        .unwrap();
        let config = Config {
            port: 0,
            rust_log: "info".to_string(),
            max_upload_bytes: 1024 * 1024,
            database_url: None,
            backends: BackendsConfig::default(),
            pipeline,
        };
        build_router(AppState {
            orchestrator: Arc::new(orchestrator),
            config,
        })
    }

    fn upload_request(file_name: &str, content_type: &str, body: &str, id: Option<&str>) -> Request<Body> {
        let mut payload = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n{body}\r\n"
        );
        if let Some(id) = id {
            payload.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"document_id\"\r\n\r\n{id}\r\n"
            ));
        }
        payload.push_str(&format!("--{BOUNDARY}--\r\n"));
        Request::post("/api/v1/documents")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(payload))
            .unwrap()
    }

    fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "resume-parser");
    }

    #[tokio::test]
    async fn test_upload_ask_export_delete() {
        let app = test_app();
        let resume = "Jane Doe\njane@x.com\n\nShe has 5 years of Python experience.";

        let response = app
            .clone()
            .oneshot(upload_request("resume.txt", "text/plain", resume, Some("jane")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let processed = body_json(response).await;
        assert_eq!(processed["documentId"], "jane");
        assert_eq!(processed["record"]["contact"]["name"], "Jane Doe");
        assert_eq!(processed["provenance"]["strategy"], "offline");

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/documents/jane/ask",
                json!({ "question": "How many years of Python experience?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let answer = body_json(response).await;
        assert!(answer["answer"].as_str().unwrap().contains("5 years"));

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/documents/jane/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"jane.json\""
        );
        let exported = body_json(response).await;
        assert_eq!(exported["contact"]["email"], "jane@x.com");

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/documents/jane").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = body_json(response).await;
        assert_eq!(fetched["documentId"], "jane");
        assert_eq!(fetched["record"]["contact"]["name"], "Jane Doe");

        let response = app
            .clone()
            .oneshot(
                Request::delete("/api/v1/documents/jane")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/documents/jane/export")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::get("/api/v1/documents/jane").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_415() {
        let response = test_app()
            .oneshot(upload_request("photo.png", "image/png", "not text", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_blank_document_is_422() {
        let response = test_app()
            .oneshot(upload_request("blank.txt", "text/plain", "   \n  ", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_ask_unknown_document_is_404() {
        let response = test_app()
            .oneshot(json_request(
                "POST",
                "/api/v1/documents/missing/ask",
                json!({ "question": "Where does she live?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_search_rejects_zero_k() {
        let response = test_app()
            .oneshot(json_request(
                "POST",
                "/api/v1/search",
                json!({ "query": "python", "k": 0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_backends_lists_index() {
        let response = test_app()
            .oneshot(Request::get("/api/v1/backends").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["indexKind"], "memory");
        assert_eq!(body["embedding"]["dimension"], 128);
    }
}
