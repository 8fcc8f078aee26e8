use std::io::Write;

use tracing::{debug, warn};

use crate::errors::PipelineError;

/// Extracts one text string per PDF page.
///
/// pdf-extract reads from a path and may panic on malformed input, so the
/// bytes go through a temp file and the call runs under `catch_unwind`.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
    if !bytes.starts_with(b"%PDF") {
        return Err(PipelineError::CorruptDocument(
            "missing %PDF header".to_string(),
        ));
    }

    let mut file = tempfile::Builder::new()
        .prefix("resume-")
        .suffix(".pdf")
        .tempfile()
        .map_err(|e| PipelineError::CorruptDocument(format!("cannot stage PDF: {e}")))?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .map_err(|e| PipelineError::CorruptDocument(format!("cannot stage PDF: {e}")))?;

    let path = file.path().to_path_buf();
    let pages_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_by_pages(&path)
    }));

    match pages_result {
        Ok(Ok(pages)) => {
            debug!("Extracted {} PDF pages", pages.len());
            Ok(pages)
        }
        Ok(Err(e)) => Err(PipelineError::CorruptDocument(format!(
            "unreadable PDF: {e}"
        ))),
        Err(panic_payload) => {
            let panic_msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            warn!("pdf-extract panicked: {}", panic_msg);
            Err(PipelineError::CorruptDocument(format!(
                "unreadable PDF: {panic_msg}"
            )))
        }
    }
}
