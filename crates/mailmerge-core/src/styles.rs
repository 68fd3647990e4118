//! Cell number formats of .xlsx and .xls workbooks
//!
//! calamine reports cell values but not how they are displayed, so the format
//! code of every styled cell in the first sheet is read separately: from
//! `xl/styles.xml` and the sheet part of an .xlsx archive, or from the BIFF8
//! records of an .xls `Workbook` stream.

use crate::numfmt::builtin_format;
use crate::ole::CompoundFile;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};
use zip::result::{ZipError, ZipResult};
use zip::ZipArchive;

const STYLES_PART: &str = "xl/styles.xml";
const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

/// Format codes by absolute (row, column), for cells that are not "General"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CellFormats {
    codes: HashMap<(u32, u32), String>,
}

impl CellFormats {
    /// Format code of the cell at `(row, col)`, if it has one
    pub fn get(&self, position: (u32, u32)) -> Option<&str> {
        self.codes.get(&position).map(String::as_str)
    }

    pub fn insert(&mut self, position: (u32, u32), code: impl Into<String>) {
        self.codes.insert(position, code.into());
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Read the formats of the first sheet of an .xlsx archive.
    ///
    /// A workbook without a styles part has no formats.
    pub fn read_xlsx(bytes: &[u8]) -> Result<Self, String> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| e.to_string())?;

        let Some(styles) = read_part(&mut archive, STYLES_PART).map_err(|e| e.to_string())? else {
            return Ok(Self::default());
        };
        let style_codes = parse_styles(&styles).map_err(|e| format!("{}: {}", STYLES_PART, e))?;

        let Some(sheet_path) = first_sheet_path(&mut archive)? else {
            return Ok(Self::default());
        };
        let Some(sheet) = read_part(&mut archive, &sheet_path).map_err(|e| e.to_string())? else {
            return Ok(Self::default());
        };

        parse_sheet(&sheet, &style_codes).map_err(|e| format!("{}: {}", sheet_path, e))
    }

    /// Read the formats of the first sheet of a BIFF8 .xls workbook.
    ///
    /// Records that cannot be read leave the affected cells General; calamine
    /// has already rejected workbooks it cannot open.
    pub fn read_xls(bytes: &[u8]) -> Self {
        let stream = CompoundFile::parse(bytes)
            .and_then(|file| file.stream("Workbook").or_else(|| file.stream("Book")));
        match stream {
            Some(stream) => biff_formats(&stream),
            None => Self::default(),
        }
    }
}

mod biff {
    pub const FORMULA: u16 = 0x0006;
    pub const EOF: u16 = 0x000A;
    pub const FILEPASS: u16 = 0x002F;
    pub const BOUNDSHEET: u16 = 0x0085;
    pub const MULRK: u16 = 0x00BD;
    pub const XF: u16 = 0x00E0;
    pub const LABELSST: u16 = 0x00FD;
    pub const BLANK: u16 = 0x0201;
    pub const NUMBER: u16 = 0x0203;
    pub const LABEL: u16 = 0x0204;
    pub const BOOLERR: u16 = 0x0205;
    pub const RK: u16 = 0x027E;
    pub const FORMAT: u16 = 0x041E;
    pub const BOF: u16 = 0x0809;
    pub const BIFF8: u16 = 0x0600;
}

/// Records of a BIFF stream from `offset` on, as (type, data)
fn biff_records(stream: &[u8], offset: usize) -> impl Iterator<Item = (u16, &[u8])> {
    let mut pos = offset;
    std::iter::from_fn(move || {
        let header = stream.get(pos..pos + 4)?;
        let kind = u16::from_le_bytes([header[0], header[1]]);
        let len = usize::from(u16::from_le_bytes([header[2], header[3]]));
        let data = stream.get(pos + 4..pos + 4 + len)?;
        pos += 4 + len;
        Some((kind, data))
    })
}

fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().ok()?))
}

/// An `XLUnicodeString`: 16-bit length, option flags, then Latin-1 or
/// UTF-16LE characters
fn unicode_string(data: &[u8]) -> Option<String> {
    let len = usize::from(le_u16(data, 0)?);
    let flags = *data.get(2)?;
    let mut start = 3;
    if flags & 0x08 != 0 {
        start += 2;
    }
    if flags & 0x04 != 0 {
        start += 4;
    }
    if flags & 0x01 != 0 {
        let units: Vec<u16> = data
            .get(start..start + len * 2)?
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    } else {
        Some(data.get(start..start + len)?.iter().map(|&b| char::from(b)).collect())
    }
}

fn biff_formats(stream: &[u8]) -> CellFormats {
    let mut custom: HashMap<u16, String> = HashMap::new();
    let mut xf_formats: Vec<u16> = Vec::new();
    let mut first_sheet = None;

    for (kind, data) in biff_records(stream, 0) {
        match kind {
            biff::BOF if le_u16(data, 0) != Some(biff::BIFF8) => return CellFormats::default(),
            biff::FILEPASS => return CellFormats::default(),
            biff::FORMAT => {
                if let (Some(id), Some(code)) = (le_u16(data, 0), data.get(2..).and_then(unicode_string)) {
                    custom.insert(id, code);
                }
            }
            biff::XF => xf_formats.push(le_u16(data, 2).unwrap_or(0)),
            biff::BOUNDSHEET if first_sheet.is_none() => {
                first_sheet = data
                    .get(..4)
                    .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize);
            }
            biff::EOF => break,
            _ => {}
        }
    }

    let style_codes: Vec<Option<String>> = xf_formats
        .iter()
        .map(|&id| match custom.get(&id) {
            Some(code) => Some(code.clone()),
            None if id == 0 => None,
            None => builtin_format(u32::from(id)).map(str::to_string),
        })
        .collect();

    let mut formats = CellFormats::default();
    let Some(offset) = first_sheet else {
        return formats;
    };
    let mut style_of = |row: u16, col: u16, xf: u16| {
        if let Some(Some(code)) = style_codes.get(usize::from(xf)) {
            formats.insert((u32::from(row), u32::from(col)), code.as_str());
        }
    };

    // Charts embedded in the sheet bring their own BOF/EOF pairs
    let mut depth = 0usize;
    for (kind, data) in biff_records(stream, offset) {
        match kind {
            biff::BOF => depth += 1,
            biff::EOF => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    break;
                }
            }
            biff::NUMBER | biff::RK | biff::LABEL | biff::LABELSST | biff::FORMULA
            | biff::BOOLERR | biff::BLANK => {
                if let (Some(row), Some(col), Some(xf)) =
                    (le_u16(data, 0), le_u16(data, 2), le_u16(data, 4))
                {
                    style_of(row, col, xf);
                }
            }
            biff::MULRK => {
                let (Some(row), Some(first_col)) = (le_u16(data, 0), le_u16(data, 2)) else {
                    continue;
                };
                let cells = data.get(4..data.len().saturating_sub(2)).unwrap_or_default();
                for (i, cell) in cells.chunks_exact(6).enumerate() {
                    if let Some(xf) = le_u16(cell, 0) {
                        style_of(row, first_col.saturating_add(i as u16), xf);
                    }
                }
            }
            _ => {}
        }
    }
    formats
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> ZipResult<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut text = String::new();
    file.read_to_string(&mut text)?;
    Ok(Some(text))
}

fn attr(reader: &Reader<&[u8]>, element: &BytesStart, name: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.decode_and_unescape_value(reader.decoder()).ok())
        .map(|v| v.into_owned())
}

/// Format code per `cellXfs` index; `None` for General
fn parse_styles(xml: &str) -> quick_xml::Result<Vec<Option<String>>> {
    let mut reader = Reader::from_str(xml);
    let mut custom: HashMap<u32, String> = HashMap::new();
    let mut codes = Vec::new();
    let mut in_cell_xfs = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"numFmt" => {
                let id = attr(&reader, &e, b"numFmtId").and_then(|v| v.parse().ok());
                if let (Some(id), Some(code)) = (id, attr(&reader, &e, b"formatCode")) {
                    custom.insert(id, code);
                }
            }
            Event::Start(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = true,
            Event::End(e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Start(e) | Event::Empty(e) if in_cell_xfs && e.local_name().as_ref() == b"xf" => {
                let id = attr(&reader, &e, b"numFmtId")
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(0);
                let code = match custom.get(&id) {
                    Some(code) => Some(code.clone()),
                    None if id == 0 => None,
                    None => builtin_format(id).map(str::to_string),
                };
                codes.push(code);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(codes)
}

/// Archive path of the first sheet listed in the workbook
fn first_sheet_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Option<String>, String> {
    let Some(workbook) = read_part(archive, WORKBOOK_PART).map_err(|e| e.to_string())? else {
        return Ok(None);
    };
    let Some(rels) = read_part(archive, WORKBOOK_RELS_PART).map_err(|e| e.to_string())? else {
        return Ok(None);
    };

    let sheet_id = first_element_attr(&workbook, b"sheet", |reader, e| attr(reader, e, b"id"))
        .map_err(|e| format!("{}: {}", WORKBOOK_PART, e))?;
    let Some(sheet_id) = sheet_id else {
        return Ok(None);
    };

    let target = first_element_attr(&rels, b"Relationship", |reader, e| {
        (attr(reader, e, b"Id").as_deref() == Some(sheet_id.as_str()))
            .then(|| attr(reader, e, b"Target"))
            .flatten()
    })
    .map_err(|e| format!("{}: {}", WORKBOOK_RELS_PART, e))?;

    Ok(target.map(|target| match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }))
}

/// First `Some` that `pick` returns for an element named `name`
fn first_element_attr<F>(xml: &str, name: &[u8], pick: F) -> quick_xml::Result<Option<String>>
where
    F: Fn(&Reader<&[u8]>, &BytesStart) -> Option<String>,
{
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == name => {
                if let Some(value) = pick(&reader, &e) {
                    return Ok(Some(value));
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn parse_sheet(xml: &str, style_codes: &[Option<String>]) -> quick_xml::Result<CellFormats> {
    let mut reader = Reader::from_str(xml);
    let mut formats = CellFormats::default();
    let mut row = 0u32;
    let mut next_row = 0u32;
    let mut next_col = 0u32;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row = attr(&reader, &e, b"r")
                    .and_then(|v| v.parse::<u32>().ok())
                    .and_then(|r| r.checked_sub(1))
                    .unwrap_or(next_row);
                next_row = row + 1;
                next_col = 0;
            }
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let position = attr(&reader, &e, b"r")
                    .and_then(|r| cell_position(&r))
                    .unwrap_or((row, next_col));
                next_col = position.1 + 1;

                let style = attr(&reader, &e, b"s")
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(0);
                if let Some(Some(code)) = style_codes.get(style) {
                    formats.insert(position, code.as_str());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(formats)
}

/// 0-based (row, column) of an `A1` style reference
fn cell_position(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }

    let col = letters.bytes().try_fold(0u32, |acc, b| {
        if !b.is_ascii_alphabetic() {
            return None;
        }
        acc.checked_mul(26)?
            .checked_add(u32::from(b.to_ascii_uppercase() - b'A') + 1)
    })?;
    let row: u32 = digits.parse().ok()?;
    Some((row.checked_sub(1)?, col - 1))
}
