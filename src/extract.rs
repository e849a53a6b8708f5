//! Multi-format text extraction (plain text, Markdown, DOCX, PDF, legacy DOC).
//!
//! Dispatch is by file extension. Modern formats are parsed in-process;
//! legacy `.doc` goes through an external converter bounded by a timeout.
//! Paragraph and page boundaries come out as blank lines so the chunker
//! sees document structure.

use std::io::Read;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::config::ExtractionConfig;
use crate::error::ExtractError;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Formats the extractor recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    PlainText,
    Docx,
    Pdf,
    LegacyDoc,
}

impl Format {
    /// Classify a filename or path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "txt" | "md" => Ok(Format::PlainText),
            "docx" => Ok(Format::Docx),
            "pdf" => Ok(Format::Pdf),
            "doc" => Ok(Format::LegacyDoc),
            _ => Err(ExtractError::UnsupportedFormat(if ext.is_empty() {
                "(none)".to_string()
            } else {
                ext
            })),
        }
    }
}

/// Extracts text from files on disk.
#[derive(Debug, Clone)]
pub struct Extractor {
    config: ExtractionConfig,
}

impl Extractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self { config }
    }

    /// Extract normalised UTF-8 text from the file at `path`.
    pub async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let format = Format::from_path(path)?;
        let size = tokio::fs::metadata(path).await?.len();
        self.check_size(size)?;

        let raw = match format {
            Format::LegacyDoc => self.convert_legacy(path).await?,
            _ => {
                let bytes = tokio::fs::read(path).await?;
                parse_in_process(format, bytes).await?
            }
        };
        Ok(normalize_paragraphs(&raw))
    }

    /// Extract from an in-memory upload. Legacy documents are spilled to a
    /// temporary file for the converter.
    pub async fn extract_bytes(&self, filename: &str, bytes: &[u8]) -> Result<String, ExtractError> {
        let format = Format::from_path(Path::new(filename))?;
        self.check_size(bytes.len() as u64)?;

        let raw = match format {
            Format::LegacyDoc => {
                let mut tmp = tempfile::Builder::new().suffix(".doc").tempfile()?;
                std::io::Write::write_all(&mut tmp, bytes)?;
                self.convert_legacy(tmp.path()).await?
            }
            _ => parse_in_process(format, bytes.to_vec()).await?,
        };
        Ok(normalize_paragraphs(&raw))
    }

    fn check_size(&self, size: u64) -> Result<(), ExtractError> {
        if size > self.config.max_file_bytes {
            return Err(ExtractError::TooLarge {
                size,
                max: self.config.max_file_bytes,
            });
        }
        Ok(())
    }

    /// Run the configured converter on a legacy document and capture stdout.
    async fn convert_legacy(&self, path: &Path) -> Result<String, ExtractError> {
        let program = &self.config.legacy_converter;
        let child = Command::new(program)
            .args(&self.config.legacy_converter_args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ExtractError::Unavailable(format!(
                    "legacy document converter '{}' is not installed",
                    program
                )));
            }
            Err(e) => {
                return Err(ExtractError::Unavailable(format!(
                    "could not start converter '{}': {}",
                    program, e
                )));
            }
        };

        let timeout = Duration::from_secs(self.config.converter_timeout_secs);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ExtractError::Unavailable(format!(
                    "converter '{}' timed out after {}s",
                    program, self.config.converter_timeout_secs
                )));
            }
        };

        if !output.status.success() {
            return Err(ExtractError::Converter(format!(
                "'{}' exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn parse_in_process(format: Format, bytes: Vec<u8>) -> Result<String, ExtractError> {
    match format {
        Format::PlainText => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Format::Docx => extract_docx(&bytes),
        Format::Pdf => tokio::task::spawn_blocking(move || extract_pdf(&bytes))
            .await
            .map_err(|e| ExtractError::Pdf(e.to_string()))?,
        Format::LegacyDoc => Err(ExtractError::UnsupportedFormat("doc".to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(text.replace('\u{c}', "\n\n"))
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Ooxml(format!("word/document.xml: {}", e)))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_paragraphs(&doc_xml)
}

/// Collect `w:t` run text, ending each `w:p` with a blank line.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push_str("\n\n"),
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Normalise line endings, strip trailing spaces and collapse blank-line
/// runs to a single blank line.
pub fn normalize_paragraphs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.replace("\r\n", "\n").replace('\r', "\n").lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}
