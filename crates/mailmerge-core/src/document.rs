//! Word (.docx) template container
//!
//! A `.docx` file is a zip archive; the text lives in `word/document.xml`
//! inside a single `w:body` element. The body is handed to the merge engine
//! as a [`TemplateBody`] and every other part of the archive is written back
//! unchanged.

use crate::body::TemplateBody;
use crate::error::{Error, Result};
use crate::workbook::{is_encrypted_package, is_ole_container};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Archive member holding the main document text
pub const DOCUMENT_PART: &str = "word/document.xml";

/// One member of the template archive
#[derive(Debug, Clone)]
struct Entry {
    name: String,
    compression: CompressionMethod,
    is_dir: bool,
    data: Vec<u8>,
}

/// A Word template loaded into memory
#[derive(Debug, Clone)]
pub struct TemplateDocument {
    path: PathBuf,
    entries: Vec<Entry>,
    /// `word/document.xml` up to the body element
    head: String,
    body: TemplateBody,
    /// `word/document.xml` after the body element
    tail: String,
}

impl TemplateDocument {
    /// Load a `.docx` template
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Error::unreadable(path, e))?;
        Self::from_bytes(path, &bytes)
    }

    fn from_bytes(path: &Path, bytes: &[u8]) -> Result<Self> {
        if is_encrypted_package(bytes) {
            return Err(Error::Encrypted {
                path: path.to_path_buf(),
            });
        }
        if is_ole_container(bytes) {
            return Err(Error::format(path, "legacy binary documents are not supported, use .docx"));
        }

        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| Error::format(path, e))?;
        let entries = read_entries(&mut archive).map_err(|e| Error::format(path, e))?;

        let document = entries
            .iter()
            .find(|e| e.name == DOCUMENT_PART)
            .ok_or_else(|| Error::format(path, format!("missing {}", DOCUMENT_PART)))?;
        let xml = String::from_utf8(document.data.clone())
            .map_err(|e| Error::format(path, format!("{} is not UTF-8: {}", DOCUMENT_PART, e)))?;

        let (start, end) = locate_body(&xml)
            .ok_or_else(|| Error::format(path, "document has no body element"))?;
        debug!("Found document body at bytes {}..{} of {}", start, end, DOCUMENT_PART);

        Ok(Self {
            path: path.to_path_buf(),
            head: xml[..start].to_string(),
            body: TemplateBody::new(&xml[start..end]),
            tail: xml[end..].to_string(),
            entries,
        })
    }

    /// Path the template was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The body element of the main document
    pub fn body(&self) -> &TemplateBody {
        &self.body
    }

    /// Mutable access to the body element for merging
    pub fn body_mut(&mut self) -> &mut TemplateBody {
        &mut self.body
    }

    /// Full text of `word/document.xml` including the current body
    pub fn document_xml(&self) -> String {
        let mut xml = String::with_capacity(
            self.head.len() + self.body.raw_text().len() + self.tail.len(),
        );
        xml.push_str(&self.head);
        xml.push_str(self.body.raw_text());
        xml.push_str(&self.tail);
        xml
    }

    /// Write the document to `path`.
    ///
    /// The merged `word/document.xml` must still be well-formed XML; if it is
    /// not, nothing is written. The archive is written to a temporary file
    /// next to `path` and renamed over it once complete, so a failed write
    /// never leaves a partial file and never touches an existing one.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let document = self.document_xml();
        check_well_formed(&document)?;

        let tmp_path = temp_path_for(path);
        let written = File::create(&tmp_path)
            .map_err(Error::from)
            .and_then(|file| self.write_to(file, &document))
            .and_then(|_| fs::rename(&tmp_path, path).map_err(Error::from));

        if written.is_err() {
            let _ = fs::remove_file(&tmp_path);
        } else {
            info!("Wrote merged document to {}", path.display());
        }
        written
    }

    fn write_to<W: Write + Seek>(&self, writer: W, document: &str) -> Result<()> {
        let mut out = ZipWriter::new(writer);

        for entry in &self.entries {
            let options = SimpleFileOptions::default().compression_method(entry.compression);
            if entry.is_dir {
                out.add_directory(entry.name.as_str(), options)
                    .map_err(io::Error::other)?;
                continue;
            }

            out.start_file(entry.name.as_str(), options)
                .map_err(io::Error::other)?;
            if entry.name == DOCUMENT_PART {
                out.write_all(document.as_bytes())?;
            } else {
                out.write_all(&entry.data)?;
            }
        }

        out.finish().map_err(io::Error::other)?;
        Ok(())
    }
}

fn read_entries<R: Read + Seek>(archive: &mut ZipArchive<R>) -> zip::result::ZipResult<Vec<Entry>> {
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        entries.push(Entry {
            name: file.name().to_string(),
            compression: file.compression(),
            is_dir: file.is_dir(),
            data,
        });
    }
    Ok(entries)
}

/// Read `xml` to the end, failing on the first markup error or unbalanced tag
fn check_well_formed(xml: &str) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) if depth == 0 => return Ok(()),
            Ok(Event::Eof) => {
                return Err(not_well_formed(position, "unclosed element at end of document"))
            }
            Err(e) => return Err(not_well_formed(reader.error_position(), e)),
            _ => {}
        }
    }
}

fn not_well_formed(position: u64, reason: impl std::fmt::Display) -> Error {
    Error::MalformedBody(format!(
        "merged {} is not well-formed XML at byte {}: {}",
        DOCUMENT_PART, position, reason
    ))
}

/// Byte range of the body element, from its `<` to the end of its closing tag
fn locate_body(xml: &str) -> Option<(usize, usize)> {
    let mut reader = Reader::from_str(xml);
    let mut start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"body" => {
                start = Some(before);
            }
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"body" => {
                return Some((before, reader.buffer_position() as usize));
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"body" => {
                return start.map(|s| (s, reader.buffer_position() as usize));
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
