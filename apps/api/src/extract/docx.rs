use std::io::{Cursor, Read};

use crate::errors::PipelineError;

/// Extracts the body text of a DOCX package, split on explicit page breaks.
pub fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, PipelineError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| PipelineError::CorruptDocument(format!("invalid DOCX archive: {e}")))?;

    let mut doc_xml = archive.by_name("word/document.xml").map_err(|_| {
        PipelineError::CorruptDocument("no word/document.xml in DOCX".to_string())
    })?;

    let mut xml = String::new();
    doc_xml
        .read_to_string(&mut xml)
        .map_err(|e| PipelineError::CorruptDocument(format!("cannot read document.xml: {e}")))?;

    Ok(pages_from_document_xml(&xml))
}

/// Walks `word/document.xml` collecting `<w:t>` runs. Paragraphs become
/// newlines, `<w:tab/>` a tab and `<w:br w:type="page"/>` a page break.
pub fn pages_from_document_xml(xml: &str) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    let mut chars = xml.chars();

    while let Some(c) = chars.next() {
        if c == '<' {
            let mut tag = String::new();
            for tc in chars.by_ref() {
                if tc == '>' {
                    break;
                }
                tag.push(tc);
            }
            let self_closing = tag.ends_with('/');
            let name = tag
                .split(|ch: char| ch.is_whitespace() || ch == '/')
                .find(|part| !part.is_empty())
                .unwrap_or_default();
            let closing = tag.starts_with('/');

            match (name, closing) {
                ("w:t", false) => in_text = !self_closing,
                ("w:t", true) => in_text = false,
                ("w:p", false) => {
                    if !current.is_empty() && !current.ends_with('\n') {
                        current.push('\n');
                    }
                }
                ("w:tab", false) => current.push('\t'),
                ("w:br", false) if tag.contains("w:type=\"page\"") => {
                    pages.push(decode_entities(&std::mem::take(&mut current)));
                }
                ("w:br", false) => current.push('\n'),
                _ => {}
            }
        } else if in_text {
            current.push(c);
        }
    }

    pages.push(decode_entities(&current));
    pages
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with_body(body: &str) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::FileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            write!(
                zip,
                "<?xml version=\"1.0\"?><w:document><w:body>{body}</w:body></w:document>"
            )
            .unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_paragraphs_become_lines() {
        let xml = "<w:p><w:r><w:t>Jane Doe</w:t></w:r></w:p>\
                   <w:p><w:r><w:t xml:space=\"preserve\">Rust &amp; Go</w:t></w:r></w:p>";
        assert_eq!(pages_from_document_xml(xml), vec!["Jane Doe\nRust & Go"]);
    }

    #[test]
    fn test_table_tags_do_not_leak_text() {
        let xml = "<w:tbl><w:tr><w:tc><w:p><w:r><w:t>Cell</w:t></w:r></w:p></w:tc></w:tr></w:tbl>";
        assert_eq!(pages_from_document_xml(xml), vec!["Cell"]);
    }

    #[test]
    fn test_page_breaks_split_pages() {
        let xml = "<w:p><w:r><w:t>One</w:t><w:br w:type=\"page\"/></w:r></w:p>\
                   <w:p><w:r><w:t>Two</w:t></w:r></w:p>";
        let pages = pages_from_document_xml(xml);
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0], "One");
        assert_eq!(pages[1].trim(), "Two");
    }

    #[test]
    fn test_extracts_from_zip_package() {
        let bytes = docx_with_body("<w:p><w:r><w:t>Senior Engineer</w:t></w:r></w:p>");
        assert_eq!(extract_pages(&bytes).unwrap(), vec!["Senior Engineer"]);
    }

    #[test]
    fn test_zip_without_document_xml_is_corrupt() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("readme.txt", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_pages(&buf.into_inner()).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptDocument(_)));
    }
}
