use crate::error::IngestError;
use lopdf::Document;

/// Turns an uploaded PDF into plain text.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl TextExtractor for LopdfExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;

            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        if pages.is_empty() {
            return Err(IngestError::PdfParse(
                "pdf had no readable page text".to_string(),
            ));
        }

        Ok(pages.join("\n\n").trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{LopdfExtractor, TextExtractor};
    use crate::error::IngestError;

    #[test]
    fn malformed_pdf_is_an_extraction_error() {
        let result = LopdfExtractor.extract(b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn non_pdf_bytes_are_rejected() {
        let result = LopdfExtractor.extract(b"plain text, not a pdf");
        assert!(result.is_err());
    }
}
