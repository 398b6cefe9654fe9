//! Text extraction for uploaded documents (plain text, PDF, DOCX).
//!
//! Extraction is pipeline-layer: the file store supplies bytes plus a
//! content-type; this module returns [`TextSegment`]s of plain UTF-8 text.
//! PDF extraction yields one segment per physical page so citations can
//! carry page numbers; the other formats have no page concept and yield a
//! single segment.

use std::io::Read;

use crate::error::{Error, Result};
use crate::models::TextSegment;

/// Supported MIME types.
pub const MIME_TXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// File extensions accepted for upload, with their content types.
pub const SUPPORTED_EXTENSIONS: &[(&str, &str)] =
    &[(".txt", MIME_TXT), (".pdf", MIME_PDF), (".docx", MIME_DOCX)];

/// Map a filename to its content type by extension, case-insensitive.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let lower = filename.to_lowercase();
    SUPPORTED_EXTENSIONS
        .iter()
        .find(|(ext, _)| lower.ends_with(ext))
        .map(|(_, ct)| *ct)
}

/// Extract text segments from file content.
///
/// Unrecognized content types go through the plain-text loader as a last
/// resort; `UnsupportedFormat` is returned only when that fallback cannot
/// produce text either. Returns an error if the file is malformed or
/// extraction yields no text at all.
pub fn extract_segments(bytes: &[u8], content_type: &str) -> Result<Vec<TextSegment>> {
    let segments = match content_type {
        MIME_TXT => extract_txt(bytes)?,
        MIME_PDF => extract_pdf(bytes)?,
        MIME_DOCX => extract_docx(bytes)?,
        other => extract_txt(bytes).map_err(|e| {
            Error::UnsupportedFormat(format!(
                "{} (plain-text fallback failed: {})",
                other, e
            ))
        })?,
    };

    if segments.iter().all(|s| s.text.trim().is_empty()) {
        return Err(Error::Extraction(
            "document contains no extractable text".to_string(),
        ));
    }

    Ok(segments)
}

fn extract_txt(bytes: &[u8]) -> Result<Vec<TextSegment>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Extraction(format!("file is not valid UTF-8: {}", e)))?;
    Ok(vec![TextSegment::new(text, None)])
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<TextSegment>> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| Error::Extraction(format!("PDF extraction failed: {}", e)))?;

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextSegment::new(text, Some(i as u32 + 1)))
        .collect())
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<TextSegment>> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| Error::Extraction(format!("DOCX is not a valid archive: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| Error::Extraction("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| Error::Extraction(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(Error::Extraction(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    let text = extract_w_t_elements(&doc_xml)?;
    Ok(vec![TextSegment::new(text, None)])
}

/// Collect text from `w:t` runs, inserting paragraph breaks at `w:p` ends.
fn extract_w_t_elements(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && !out.ends_with("\n\n") && !out.is_empty() {
                    out.push_str("\n\n");
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(Error::Extraction(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_yields_one_segment_without_page() {
        let segments = extract_segments(b"hello world", MIME_TXT).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hello world");
        assert_eq!(segments[0].source_page, None);
    }

    #[test]
    fn unknown_content_type_falls_back_to_plain_text() {
        let segments = extract_segments(b"readable anyway", "application/octet-stream").unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "readable anyway");
        assert_eq!(segments[0].source_page, None);
    }

    #[test]
    fn unknown_content_type_errors_when_fallback_fails() {
        // Invalid UTF-8, so the plain-text fallback cannot decode it.
        let err = extract_segments(&[0xff, 0xfe, 0x00], "application/octet-stream").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn invalid_pdf_returns_extraction_error() {
        let err = extract_segments(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_segments(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn whitespace_only_text_is_rejected() {
        let err = extract_segments(b"   \n\t  ", MIME_TXT).unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }

    #[test]
    fn content_type_lookup_is_case_insensitive() {
        assert_eq!(content_type_for("Report.PDF"), Some(MIME_PDF));
        assert_eq!(content_type_for("notes.txt"), Some(MIME_TXT));
        assert_eq!(content_type_for("deck.pptx"), None);
    }

    #[test]
    fn docx_paragraph_breaks_are_preserved() {
        let xml = br#"<w:document xmlns:w="ns"><w:body>
            <w:p><w:r><w:t>First.</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second.</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = extract_w_t_elements(xml).unwrap();
        assert_eq!(text, "First.\n\nSecond.");
    }
}
