use crate::errors::PipelineError;

const FORM_FEED: char = '\u{000C}';

/// Decodes plain text. Form feeds are treated as page breaks.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.contains(&0) {
        return Err(PipelineError::CorruptDocument(
            "text upload contains binary data".to_string(),
        ));
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::CorruptDocument(format!("text upload is not valid UTF-8: {e}")))?;

    Ok(text.split(FORM_FEED).map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_bom() {
        let pages = extract_pages(b"\xEF\xBB\xBFJane Doe").unwrap();
        assert_eq!(pages, vec!["Jane Doe"]);
    }

    #[test]
    fn test_form_feed_splits_pages() {
        let pages = extract_pages(b"one\x0ctwo").unwrap();
        assert_eq!(pages, vec!["one", "two"]);
    }

    #[test]
    fn test_binary_is_rejected() {
        let err = extract_pages(b"\x89PNG\r\n\x1a\n\x00\x00").unwrap_err();
        assert!(matches!(err, PipelineError::CorruptDocument(_)));
    }

    #[test]
    fn test_invalid_utf8_is_corrupt() {
        let err = extract_pages(b"Caf\xe9").unwrap_err();
        assert!(matches!(err, PipelineError::CorruptDocument(_)));
    }
}
