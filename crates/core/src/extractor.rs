use crate::error::IngestError;
use crate::models::SourceDocument;
use chrono::Utc;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const DOCX_BODY_ENTRY: &str = "word/document.xml";
/// Decompressed size ceiling for the docx body entry.
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    PlainText,
    Docx,
    Pdf,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" => Some(FileKind::PlainText),
            "docx" => Some(FileKind::Docx),
            "pdf" => Some(FileKind::Pdf),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FileKind::PlainText => MIME_TEXT,
            FileKind::Docx => MIME_DOCX,
            FileKind::Pdf => MIME_PDF,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FileKind::PlainText => "txt",
            FileKind::Docx => "docx",
            FileKind::Pdf => "pdf",
        }
    }
}

/// Text of every page that has any, in page order.
fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, IngestError> {
    let document =
        Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

    let mut pages = Vec::new();
    for page_no in document.get_pages().into_keys() {
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

    Ok(pages)
}

/// Validates and extracts files of the supported kinds.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    max_file_bytes: u64,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            max_file_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Extractor {
    pub fn new(max_file_bytes: u64) -> Self {
        Self { max_file_bytes }
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    /// Checks existence, type, size and kind without reading the contents.
    pub fn validate(&self, path: &Path) -> Result<FileKind, IngestError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(_) => return Err(IngestError::NotFound(path.display().to_string())),
        };

        if !metadata.is_file() {
            return Err(IngestError::NotAFile(path.display().to_string()));
        }

        if metadata.len() > self.max_file_bytes {
            return Err(IngestError::TooLarge {
                size: metadata.len(),
                max: self.max_file_bytes,
            });
        }

        FileKind::from_path(path).ok_or_else(|| {
            let extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| format!(".{ext}"))
                .unwrap_or_else(|| "<none>".to_string());
            IngestError::UnsupportedType(extension)
        })
    }

    pub fn extract(&self, path: &Path) -> Result<String, IngestError> {
        let kind = FileKind::from_path(path)
            .ok_or_else(|| IngestError::UnsupportedType(path.display().to_string()))?;
        let bytes = fs::read(path)?;
        extract_bytes(kind, &bytes)
    }

    /// Validates, hashes and extracts one file into a [`SourceDocument`].
    pub fn process(&self, path: &Path) -> Result<SourceDocument, IngestError> {
        let kind = self.validate(path)?;
        let bytes = fs::read(path)?;
        self.process_bytes(path, kind, &bytes)
    }

    /// Builds a [`SourceDocument`] from bytes already read from `path`, so the
    /// content hash always matches the extracted text.
    pub fn process_bytes(
        &self,
        path: &Path,
        kind: FileKind,
        bytes: &[u8],
    ) -> Result<SourceDocument, IngestError> {
        let file_name = file_name_of(path)?;
        let text = extract_bytes(kind, bytes)?;

        debug!(file = %file_name, chars = text.chars().count(), "extracted text");

        Ok(SourceDocument {
            source_id: digest_bytes(bytes),
            file_name,
            source_path: path.to_string_lossy().to_string(),
            mime_type: kind.mime_type().to_string(),
            byte_size: bytes.len() as u64,
            extracted_at: Utc::now(),
            text,
        })
    }
}

pub fn extract_bytes(kind: FileKind, bytes: &[u8]) -> Result<String, IngestError> {
    match kind {
        FileKind::PlainText => Ok(decode_text(bytes)),
        FileKind::Docx => extract_docx_text(bytes),
        FileKind::Pdf => Ok(extract_pdf_pages(bytes)?.join("\n")),
    }
}

/// UTF-8 first, Latin-1 when the bytes are not valid UTF-8. Never fails.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}

pub fn extract_docx_text(bytes: &[u8]) -> Result<String, IngestError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|error| IngestError::Docx(error.to_string()))?;
    let entry = archive
        .by_name(DOCX_BODY_ENTRY)
        .map_err(|error| IngestError::Docx(format!("{DOCX_BODY_ENTRY}: {error}")))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|error| IngestError::Docx(error.to_string()))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(IngestError::Docx(format!(
            "{DOCX_BODY_ENTRY} exceeds size limit"
        )));
    }

    paragraphs_from_document_xml(&xml).map(|paragraphs| paragraphs.join("\n"))
}

/// One entry per `w:p`, in document order. Table cells hold their own
/// paragraphs, so they come out where they appear in the body.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<Vec<String>, IngestError> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    // Tab elements outside a run are tab-stop definitions, not content.
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = true,
                b"r" => in_run = true,
                b"p" => current.clear(),
                _ => {}
            },
            Ok(Event::Empty(element)) => match element.local_name().as_ref() {
                b"tab" if in_run => current.push('\t'),
                b"br" | b"cr" if in_run => current.push('\n'),
                b"p" => paragraphs.push(String::new()),
                _ => {}
            },
            Ok(Event::Text(text)) if in_text_run => {
                let unescaped = text
                    .unescape()
                    .map_err(|error| IngestError::Docx(error.to_string()))?;
                current.push_str(&unescaped);
            }
            Ok(Event::End(element)) => match element.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"r" => in_run = false,
                b"p" => paragraphs.push(std::mem::take(&mut current)),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(error) => return Err(IngestError::Docx(error.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(paragraphs)
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub(crate) fn file_name_of(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    pub(crate) fn docx_bytes(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file("[Content_Types].xml", options)
            .expect("start content types");
        writer
            .write_all(br#"<?xml version="1.0" encoding="UTF-8"?><Types/>"#)
            .expect("write content types");
        writer
            .start_file(DOCX_BODY_ENTRY, options)
            .expect("start document");
        writer
            .write_all(document_xml.as_bytes())
            .expect("write document");
        writer.finish().expect("finish zip").into_inner()
    }

    pub(crate) fn pdf_bytes(text: &str) -> Vec<u8> {
        use lopdf::content::{Content, Operation};
        use lopdf::{dictionary, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("encode content"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save pdf");
        out
    }

    const DOCX_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Quarterly</w:t></w:r><w:r><w:t xml:space="preserve"> report &amp; notes</w:t></w:r></w:p>
    <w:tbl>
      <w:tr>
        <w:tc><w:p><w:r><w:t>Revenue</w:t></w:r></w:p></w:tc>
        <w:tc><w:p><w:r><w:t>42</w:t></w:r></w:p></w:tc>
      </w:tr>
    </w:tbl>
    <w:p><w:r><w:t>Closing</w:t><w:tab/><w:t>remarks</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn tab_stop_definitions_are_not_text() {
        let body = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/><w:tab w:val="right" w:pos="9000"/></w:tabs></w:pPr><w:r><w:t>Item</w:t><w:tab/><w:t>Qty</w:t></w:r></w:p>
</w:body></w:document>"#;
        let text = extract_docx_text(&docx_bytes(body)).expect("docx text");
        assert_eq!(text, "Item\tQty");
    }

    #[test]
    fn plain_text_falls_back_to_latin1() {
        let latin1 = [b'c', b'a', b'f', 0xE9];
        assert_eq!(decode_text(&latin1), "café");
        assert_eq!(decode_text("olá".as_bytes()), "olá");
    }

    #[test]
    fn bom_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"hello");
        assert_eq!(decode_text(&bytes), "hello");
    }

    #[test]
    fn docx_paragraphs_and_cells_are_joined_in_document_order() {
        let text = extract_docx_text(&docx_bytes(DOCX_BODY)).expect("docx text");
        assert_eq!(text, "Quarterly report & notes\nRevenue\n42\nClosing\tremarks");
    }

    #[test]
    fn corrupt_docx_is_an_error_not_a_panic() {
        let result = extract_docx_text(b"PK\x03\x04 definitely not a zip");
        assert!(matches!(result, Err(IngestError::Docx(_))));
    }

    #[test]
    fn pdf_text_is_extracted() {
        let text = extract_bytes(FileKind::Pdf, &pdf_bytes("Hello grounded world")).expect("pdf");
        assert!(text.contains("Hello"));
    }

    #[test]
    fn corrupt_pdf_is_an_error() {
        let result = extract_bytes(FileKind::Pdf, b"%PDF-1.4\n%broken");
        assert!(matches!(result, Err(IngestError::PdfParse(_))));
    }

    #[test]
    fn validate_rejects_missing_directories_large_and_unsupported(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = Extractor::new(8);

        assert!(matches!(
            extractor.validate(&dir.path().join("missing.txt")),
            Err(IngestError::NotFound(_))
        ));
        assert!(matches!(
            extractor.validate(dir.path()),
            Err(IngestError::NotAFile(_))
        ));

        let big = dir.path().join("big.txt");
        fs::write(&big, b"more than eight bytes")?;
        assert!(matches!(
            extractor.validate(&big),
            Err(IngestError::TooLarge { size: 21, max: 8 })
        ));

        let image = dir.path().join("photo.png");
        fs::write(&image, b"png")?;
        assert!(matches!(
            extractor.validate(&image),
            Err(IngestError::UnsupportedType(ext)) if ext == ".png"
        ));

        let ok = dir.path().join("NOTES.TXT");
        fs::write(&ok, b"fine")?;
        assert_eq!(extractor.validate(&ok)?, FileKind::PlainText);
        Ok(())
    }

    #[test]
    fn extract_dispatches_on_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docx = dir.path().join("report.DOCX");
        fs::write(&docx, docx_bytes(DOCX_BODY))?;

        let text = Extractor::default().extract(&docx)?;
        assert!(text.starts_with("Quarterly report"));
        assert!(matches!(
            Extractor::default().extract(&dir.path().join("notes.md")),
            Err(IngestError::UnsupportedType(_))
        ));
        Ok(())
    }

    #[test]
    fn process_builds_source_document_with_content_hash(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "The pump runs at 40 bar.")?;

        let document = Extractor::default().process(&path)?;

        assert_eq!(document.file_name, "notes.txt");
        assert_eq!(document.mime_type, MIME_TEXT);
        assert_eq!(document.byte_size, 24);
        assert_eq!(document.source_id, digest_bytes(&fs::read(&path)?));
        assert_eq!(document.text, "The pump runs at 40 bar.");
        Ok(())
    }
}
