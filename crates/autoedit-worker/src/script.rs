//! Script text extraction.
//!
//! Scripts arrive as plain text, Markdown, PDF or DOCX. PDF and DOCX support
//! is compiled in through the `pdf` and `docx` features.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{WorkerError, WorkerResult};

/// Supported script document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl ScriptFormat {
    /// Format for a file extension (case-insensitive, without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            _ => None,
        }
    }

    /// Format for a file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether text can be extracted from this format in this build.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Text | Self::Markdown => true,
            Self::Pdf => cfg!(feature = "pdf"),
            Self::Docx => cfg!(feature = "docx"),
        }
    }

    /// Extensions accepted for script uploads in this build.
    pub fn accepted_extensions() -> Vec<&'static str> {
        [
            ("txt", Self::Text),
            ("md", Self::Markdown),
            ("pdf", Self::Pdf),
            ("docx", Self::Docx),
        ]
        .into_iter()
        .filter(|(_, format)| format.is_available())
        .map(|(ext, _)| ext)
        .collect()
    }
}

/// Extract plain text from a script file. Blocking.
pub fn extract_script_blocking(path: &Path) -> WorkerResult<String> {
    let format = ScriptFormat::from_path(path)
        .filter(ScriptFormat::is_available)
        .ok_or_else(|| WorkerError::UnsupportedScript(path.display().to_string()))?;

    debug!(path = %path.display(), ?format, "Extracting script text");

    let text = match format {
        ScriptFormat::Text | ScriptFormat::Markdown => read_text(path)?,
        ScriptFormat::Pdf => read_pdf(path)?,
        ScriptFormat::Docx => read_docx(path)?,
    };
    let text = text.trim();

    if text.is_empty() && matches!(format, ScriptFormat::Pdf | ScriptFormat::Docx) {
        return Err(WorkerError::script_extraction(format!(
            "no text found in {}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("script document")
        )));
    }

    Ok(text.to_string())
}

/// Extract plain text from a script file on the blocking pool.
pub async fn extract_script(path: PathBuf) -> WorkerResult<String> {
    tokio::task::spawn_blocking(move || extract_script_blocking(&path))
        .await
        .map_err(|e| WorkerError::script_extraction(format!("extraction task failed: {}", e)))?
}

fn read_text(path: &Path) -> WorkerResult<String> {
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&bytes);
    Ok(text.trim_start_matches('\u{feff}').to_string())
}

#[cfg(feature = "pdf")]
fn read_pdf(path: &Path) -> WorkerResult<String> {
    let doc = lopdf::Document::load(path)
        .map_err(|e| WorkerError::script_extraction(format!("failed to load PDF: {}", e)))?;

    join_pages(
        doc.get_pages()
            .into_keys()
            .map(|page_num| (page_num, doc.extract_text(&[page_num]))),
    )
}

/// Concatenate page texts. Unreadable pages are skipped unless no page
/// yielded any text, in which case the first page error is returned.
#[cfg(feature = "pdf")]
fn join_pages<E: std::fmt::Display>(
    pages: impl IntoIterator<Item = (u32, Result<String, E>)>,
) -> WorkerResult<String> {
    let mut text = String::new();
    let mut first_error = None;

    for (page_num, page) in pages {
        match page {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => {
                debug!(page = page_num, "Could not extract PDF page text: {}", e);
                first_error.get_or_insert_with(|| format!("page {}: {}", page_num, e));
            }
        }
    }

    match first_error {
        Some(err) if text.trim().is_empty() => Err(WorkerError::script_extraction(format!(
            "failed to extract PDF text ({})",
            err
        ))),
        _ => Ok(text),
    }
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(path: &Path) -> WorkerResult<String> {
    Err(WorkerError::UnsupportedScript(path.display().to_string()))
}

#[cfg(feature = "docx")]
fn read_docx(path: &Path) -> WorkerResult<String> {
    use std::io::Read;

    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| WorkerError::script_extraction(format!("failed to open DOCX: {}", e)))?;

    let mut document_xml = archive
        .by_name("word/document.xml")
        .map_err(|e| WorkerError::script_extraction(format!("missing document.xml: {}", e)))?;

    let mut xml = String::new();
    document_xml.read_to_string(&mut xml)?;

    parse_docx_xml(&xml)
}

#[cfg(not(feature = "docx"))]
fn read_docx(path: &Path) -> WorkerResult<String> {
    Err(WorkerError::UnsupportedScript(path.display().to_string()))
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
#[cfg(feature = "docx")]
fn parse_docx_xml(xml: &str) -> WorkerResult<String> {
    use quick_xml::escape::resolve_predefined_entity;
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) if in_text => {
                let decoded = e.decode().map_err(|e| {
                    WorkerError::script_extraction(format!("DOCX text decoding error: {}", e))
                })?;
                text.push_str(&decoded);
            }
            Ok(Event::GeneralRef(e)) if in_text => {
                let resolved = e.resolve_char_ref().map_err(|e| {
                    WorkerError::script_extraction(format!("DOCX character reference error: {}", e))
                })?;
                match resolved {
                    Some(ch) => text.push(ch),
                    None => {
                        let name = e.decode().map_err(|e| {
                            WorkerError::script_extraction(format!("DOCX text decoding error: {}", e))
                        })?;
                        if let Some(value) = resolve_predefined_entity(&name) {
                            text.push_str(value);
                        }
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(WorkerError::script_extraction(format!(
                    "DOCX XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_detection() {
        assert_eq!(ScriptFormat::from_path(Path::new("a/script.TXT")), Some(ScriptFormat::Text));
        assert_eq!(ScriptFormat::from_path(Path::new("notes.md")), Some(ScriptFormat::Markdown));
        assert_eq!(ScriptFormat::from_path(Path::new("brief.docx")), Some(ScriptFormat::Docx));
        assert_eq!(ScriptFormat::from_path(Path::new("malware.exe")), None);
        assert_eq!(ScriptFormat::from_path(Path::new("no_extension")), None);
    }

    #[test]
    fn test_accepted_extensions_include_text() {
        let accepted = ScriptFormat::accepted_extensions();
        assert!(accepted.contains(&"txt"));
        assert!(accepted.contains(&"md"));
    }

    #[test]
    fn test_extract_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.txt");
        std::fs::write(&path, "\u{feff}  Intro\nOutro  \n").unwrap();

        assert_eq!(extract_script_blocking(&path).unwrap(), "Intro\nOutro");
    }

    #[test]
    fn test_extract_lossy_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.md");
        std::fs::write(&path, [b'o', b'k', 0xff, b'!']).unwrap();

        let text = extract_script_blocking(&path).unwrap();
        assert!(text.starts_with("ok"));
        assert!(text.ends_with('!'));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.exe");
        std::fs::write(&path, "x").unwrap();

        let err = extract_script_blocking(&path).unwrap_err();
        assert!(err.is_input_error());
    }

    #[cfg(feature = "docx")]
    #[test]
    fn test_parse_docx_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
                <w:p><w:r><w:t>Hello</w:t></w:r><w:r><w:t xml:space="preserve"> World</w:t></w:r></w:p>
                <w:p><w:r><w:t>Second line</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;

        let text = parse_docx_xml(xml).unwrap();
        assert!(text.contains("Hello World"));
        assert!(text.contains("Second line"));
    }

    #[cfg(feature = "docx")]
    #[test]
    fn test_parse_docx_xml_resolves_entities() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
            <w:body>
                <w:p><w:r><w:t>Tom &amp; Jerry say &quot;hi&quot;</w:t></w:r></w:p>
                <w:p><w:r><w:t>1 &lt; 2 &#8212; caf&#xE9;</w:t></w:r></w:p>
            </w:body>
        </w:document>"#;

        let text = parse_docx_xml(xml).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["Tom & Jerry say \"hi\"", "1 < 2 \u{2014} caf\u{e9}"]);
    }

    #[cfg(feature = "docx")]
    #[test]
    fn test_docx_without_text_is_input_error() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.docx");
        let mut archive = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
        archive
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        archive
            .write_all(br#"<w:document xmlns:w="urn:w"><w:body><w:p/></w:body></w:document>"#)
            .unwrap();
        archive.finish().unwrap();

        let err = extract_script_blocking(&path).unwrap_err();
        assert!(matches!(err, WorkerError::ScriptExtraction(ref msg) if msg.contains("no text")));
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn test_join_pages_skips_unreadable_pages() {
        let pages = vec![
            (1, Ok("Intro".to_string())),
            (2, Err("bad font")),
            (3, Ok("Outro".to_string())),
        ];
        assert_eq!(join_pages(pages).unwrap(), "Intro\nOutro\n");
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn test_join_pages_fails_when_every_page_fails() {
        let pages: Vec<(u32, Result<String, &str>)> = vec![(1, Err("bad font")), (2, Err("bad stream"))];

        let err = join_pages(pages).unwrap_err();
        assert!(err.is_input_error());
        assert!(err.to_string().contains("page 1: bad font"));
    }

    #[cfg(feature = "docx")]
    #[test]
    fn test_corrupt_docx_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.docx");
        std::fs::write(&path, "not a zip archive").unwrap();

        let err = extract_script_blocking(&path).unwrap_err();
        assert!(err.is_input_error());
    }

    #[cfg(feature = "pdf")]
    #[test]
    fn test_corrupt_pdf_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.pdf");
        std::fs::write(&path, "%PDF-garbage").unwrap();

        let err = extract_script_blocking(&path).unwrap_err();
        assert!(err.is_input_error());
    }
}
