// src/models/document.rs
//! TokenScript document model.
//!
//! A TokenScript is a signed XML document describing token-bound UI cards.
//! The document is parsed once and then only read by the verification engine.

use crate::error::VerificationError;
use crate::xml::dom::Document;

/// A parsed TokenScript document together with its raw source.
///
/// # Fields
/// - `raw`: The document text exactly as loaded
/// - `xml`: The owned XML tree with resolved namespaces
///
/// # Immutability
/// Neither field is exposed mutably. Verification borrows the document and
/// never changes it.
#[derive(Debug, Clone)]
pub struct TokenScriptDocument {
    raw: String,
    xml: Document,
}

impl TokenScriptDocument {
    /// Parses a TokenScript document from its text.
    ///
    /// # Errors
    /// Returns [`VerificationError::MalformedDocument`] if the text is not
    /// well-formed, namespace-valid XML.
    pub fn parse(raw: &str) -> Result<Self, VerificationError> {
        let xml = Document::parse(raw)
            .map_err(|e| VerificationError::MalformedDocument(e.to_string()))?;
        Ok(Self {
            raw: raw.to_string(),
            xml,
        })
    }

    /// Parses a TokenScript document from UTF-8 bytes, skipping a leading BOM.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VerificationError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes)
            .map_err(|e| VerificationError::MalformedDocument(format!("invalid UTF-8: {}", e)))?;
        Self::parse(text)
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn xml(&self) -> &Document {
        &self.xml
    }

    /// Value of the root element's `name` attribute, if any.
    pub fn name(&self) -> Option<&str> {
        self.xml.root.attribute("name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keeps_raw_text() {
        let raw = r#"<ts:token xmlns:ts="http://tokenscript.org/2024/01/tokenscript" name="Demo"/>"#;
        let document = TokenScriptDocument::parse(raw).unwrap();
        assert_eq!(document.raw(), raw);
        assert_eq!(document.name(), Some("Demo"));
        assert_eq!(document.xml().root.local_name, "token");
    }

    #[test]
    fn test_from_bytes_strips_bom() {
        let document = TokenScriptDocument::from_bytes(b"\xEF\xBB\xBF<token/>").unwrap();
        assert_eq!(document.xml().root.local_name, "token");
    }

    #[test]
    fn test_malformed_document_is_rejected() {
        let err = TokenScriptDocument::parse("<token>").unwrap_err();
        assert!(matches!(err, VerificationError::MalformedDocument(_)));
        assert!(TokenScriptDocument::from_bytes(&[0xff, 0xfe]).is_err());
    }
}
