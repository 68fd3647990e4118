//! Excel (.xls/.xlsx) reader for merge data files
//!
//! Only the first sheet is read. Row 0 holds the headers and decides which
//! columns are read for every following row.

use crate::error::{Error, Result};
use crate::numfmt::{datetime_to_serial, format_general, format_number};
use crate::ole::{self, CompoundFile};
use crate::styles::CellFormats;
use crate::table::Dataset;
use calamine::{Data, ExcelDateTime, Range, Reader, Xls, XlsError, Xlsx};
use chrono::{NaiveDateTime, Timelike};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

/// Signature of a zip archive (.xlsx, .docx)
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// First sheet of a workbook, if it has one, with its cell formats
#[derive(Debug)]
struct FirstSheet {
    cells: Option<Range<Data>>,
    formats: CellFormats,
}

/// Outcome of trying one container format
enum Probe {
    /// The container was recognized
    Opened(FirstSheet),
    /// Not this format, try the next probe
    WrongFormat,
}

type ProbeFn = fn(&Path, &[u8]) -> Result<Probe>;

/// Probes in the order they are attempted
const PROBES: &[(&str, ProbeFn)] = &[("xls", probe_xls), ("xlsx", probe_xlsx)];

/// Parse the first sheet of an Excel workbook into a Dataset
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| Error::unreadable(path, e))?;

    let sheet = open_first_sheet(path, &bytes)?;
    debug!("{} cells with a number format", sheet.formats.len());
    dataset_from_sheet(path, sheet.cells, &sheet.formats)
}

fn open_first_sheet(path: &Path, bytes: &[u8]) -> Result<FirstSheet> {
    for (name, probe) in PROBES {
        match probe(path, bytes)? {
            Probe::Opened(sheet) => {
                debug!("Opened {} as {} workbook", path.display(), name);
                return Ok(sheet);
            }
            Probe::WrongFormat => continue,
        }
    }

    Err(Error::format(path, "not a recognized spreadsheet container"))
}

fn probe_xls(path: &Path, bytes: &[u8]) -> Result<Probe> {
    if !is_ole_container(bytes) {
        return Ok(Probe::WrongFormat);
    }
    if is_encrypted_package(bytes) {
        return Err(Error::Encrypted {
            path: path.to_path_buf(),
        });
    }

    let mut workbook = match Xls::new(Cursor::new(bytes)) {
        Ok(workbook) => workbook,
        Err(XlsError::Password) => {
            return Err(Error::Encrypted {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(Error::format(path, e)),
    };

    let cells = match workbook.sheet_names().first() {
        Some(name) => Some(
            workbook
                .worksheet_range(name)
                .map_err(|e| Error::format(path, e))?,
        ),
        None => None,
    };
    Ok(Probe::Opened(FirstSheet {
        cells,
        formats: CellFormats::read_xls(bytes),
    }))
}

fn probe_xlsx(path: &Path, bytes: &[u8]) -> Result<Probe> {
    if !bytes.starts_with(&ZIP_MAGIC) {
        return Ok(Probe::WrongFormat);
    }

    let mut workbook: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| Error::format(path, e))?;
    let cells = match workbook.sheet_names().first() {
        Some(name) => Some(
            workbook
                .worksheet_range(name)
                .map_err(|e| Error::format(path, e))?,
        ),
        None => None,
    };
    let formats = CellFormats::read_xlsx(bytes).map_err(|e| Error::format(path, e))?;
    Ok(Probe::Opened(FirstSheet { cells, formats }))
}

/// Password protected OOXML files are stored as an OLE2 file whose
/// directory has an `EncryptedPackage` stream
pub(crate) fn is_encrypted_package(bytes: &[u8]) -> bool {
    CompoundFile::parse(bytes).is_some_and(|file| file.has_stream("EncryptedPackage"))
}

/// True if the bytes look like an OLE2 compound file
pub(crate) fn is_ole_container(bytes: &[u8]) -> bool {
    bytes.starts_with(&ole::SIGNATURE)
}

/// Turn the first sheet (if any) into headers and rows
fn dataset_from_sheet(
    path: &Path,
    sheet: Option<Range<Data>>,
    formats: &CellFormats,
) -> Result<Dataset> {
    let sheet = sheet.ok_or_else(|| Error::MissingSheet {
        path: path.to_path_buf(),
    })?;

    let missing_header = || Error::MissingHeaderRow {
        path: path.to_path_buf(),
    };
    let (Some((first_row, first_col)), Some((last_row, last_col))) = (sheet.start(), sheet.end())
    else {
        return Err(missing_header());
    };
    if first_row > 0 {
        return Err(missing_header());
    }

    // The used cells of row 0 decide the column range for every row
    let used: Vec<u32> = (first_col..=last_col)
        .filter(|&col| !is_empty(sheet.get_value((0, col))))
        .collect();
    let (Some(&start), Some(&end)) = (used.first(), used.last()) else {
        return Err(missing_header());
    };

    let text_at = |position: (u32, u32)| {
        sheet
            .get_value(position)
            .and_then(|cell| display_text(cell, formats.get(position)))
    };

    let mut dataset = Dataset::new(path.to_path_buf());
    for col in start..=end {
        let header = text_at((0, col));
        match &header {
            Some(name) => info!("Had header '{}' for column {}", name, column_name(col)),
            None => info!("Had empty header for column {}", column_name(col)),
        }
        dataset.headers.push(header);
    }

    for row in 1..=last_row {
        // A row without any cell at all is skipped, not recorded as blank
        if (first_col..=last_col).all(|col| is_empty(sheet.get_value((row, col)))) {
            continue;
        }

        let values = (start..=end).map(|col| text_at((row, col))).collect();
        dataset.push_row(values);
    }

    info!("Found {} lines", dataset.row_count());
    Ok(dataset)
}

fn is_empty(cell: Option<&Data>) -> bool {
    matches!(cell, None | Some(Data::Empty))
}

/// Text of a cell as a spreadsheet viewer would show it; `None` for no cell.
///
/// Numbers go through the cell's format code, or the General rules when it
/// has none.
fn display_text(cell: &Data, code: Option<&str>) -> Option<String> {
    let number = |value: f64| match code {
        Some(code) => format_number(value, code),
        None => format_general(value),
    };
    let text = match cell {
        Data::Empty => return None,
        Data::String(s) => s.clone(),
        Data::Int(i) => number(*i as f64),
        Data::Float(f) => number(*f),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::DateTime(dt) => match code {
            Some(code) => format_number(dt.as_f64(), code),
            None => format_datetime(dt),
        },
        Data::DateTimeIso(s) => match (code, s.parse::<NaiveDateTime>().ok()) {
            (Some(code), Some(dt)) => match datetime_to_serial(dt) {
                Some(serial) => format_number(serial, code),
                None => s.clone(),
            },
            _ => s.clone(),
        },
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => e.to_string(),
    };
    Some(text)
}

/// Dates and times of cells without a format code
fn format_datetime(value: &ExcelDateTime) -> String {
    if value.is_duration() {
        return format_general(value.as_f64());
    }
    match value.as_datetime() {
        Some(dt) if value.as_f64() < 1.0 => dt.format("%H:%M:%S").to_string(),
        Some(dt) if dt.num_seconds_from_midnight() == 0 => dt.format("%Y-%m-%d").to_string(),
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format_general(value.as_f64()),
    }
}

/// Spreadsheet column letters for a 0-based index (0 -> A, 26 -> AA)
fn column_name(index: u32) -> String {
    let mut name = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        name.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn sheet(cells: &[((u32, u32), Data)]) -> Range<Data> {
        let rows = cells.iter().map(|(p, _)| p.0);
        let cols = cells.iter().map(|(p, _)| p.1);
        let start = (rows.clone().min().unwrap(), cols.clone().min().unwrap());
        let end = (rows.max().unwrap(), cols.max().unwrap());
        let mut range = Range::new(start, end);
        for (pos, value) in cells {
            range.set_value(*pos, value.clone());
        }
        range
    }

    fn from_sheet(name: &str, sheet: Option<Range<Data>>) -> Result<Dataset> {
        dataset_from_sheet(Path::new(name), sheet, &CellFormats::default())
    }

    fn text(s: &str) -> Data {
        Data::String(s.to_string())
    }

    #[test]
    fn test_no_sheet() {
        let err = from_sheet("empty.xlsx", None).unwrap_err();
        assert!(matches!(err, Error::MissingSheet { .. }));
    }

    #[test]
    fn test_empty_sheet_has_no_header_row() {
        let err = from_sheet("empty.xlsx", Some(Range::empty())).unwrap_err();
        assert!(matches!(err, Error::MissingHeaderRow { .. }));
    }

    #[test]
    fn test_header_row_must_be_row_zero() {
        let range = sheet(&[((1, 0), text("Name")), ((2, 0), text("Ann"))]);
        let err = from_sheet("late.xlsx", Some(range)).unwrap_err();
        assert!(matches!(err, Error::MissingHeaderRow { .. }));
    }

    #[test]
    fn test_missing_row_in_between() {
        let range = sheet(&[((0, 0), text("Header")), ((2, 0), text("Value"))]);
        let dataset = from_sheet("gap.xlsx", Some(range)).unwrap();

        assert_eq!(dataset.headers, vec![some("Header")]);
        assert_eq!(dataset.row_count(), 1);
        assert_eq!(dataset.rows[0].values, vec![some("Value")]);
    }

    #[test]
    fn test_header_gaps_are_none() {
        let range = sheet(&[
            ((0, 1), text("Name")),
            ((0, 3), text("City")),
            ((1, 1), text("Ann")),
            ((1, 2), text("hidden")),
            ((1, 3), text("NYC")),
        ]);
        let dataset = from_sheet("gaps.xlsx", Some(range)).unwrap();

        assert_eq!(dataset.headers, vec![some("Name"), None, some("City")]);
        assert_eq!(
            dataset.rows[0].values,
            vec![some("Ann"), some("hidden"), some("NYC")]
        );
    }

    #[test]
    fn test_column_range_comes_from_header_row() {
        let range = sheet(&[
            ((0, 1), text("Name")),
            ((1, 0), text("left")),
            ((1, 1), text("Ann")),
            ((1, 2), text("right")),
        ]);
        let dataset = from_sheet("wide.xlsx", Some(range)).unwrap();

        assert_eq!(dataset.headers, vec![some("Name")]);
        assert_eq!(dataset.rows[0].values, vec![some("Ann")]);
    }

    #[test]
    fn test_cell_display_text() {
        assert_eq!(display_text(&Data::Empty, None), None);
        assert_eq!(display_text(&Data::Float(42.0), None), some("42"));
        assert_eq!(display_text(&Data::Float(-0.0), None), some("0"));
        assert_eq!(display_text(&Data::Float(3.25), None), some("3.25"));
        assert_eq!(display_text(&Data::Float(1.0 / 3.0), None), some("0.333333333"));
        assert_eq!(display_text(&Data::Int(7), None), some("7"));
        assert_eq!(display_text(&Data::Bool(true), None), some("TRUE"));
        assert_eq!(display_text(&text("x"), None), some("x"));
    }

    #[test]
    fn test_cell_display_text_with_format() {
        assert_eq!(
            display_text(&Data::Float(1234.5), Some("$#,##0.00")),
            some("$1,234.50")
        );
        assert_eq!(display_text(&Data::Float(0.25), Some("0%")), some("25%"));
        assert_eq!(display_text(&Data::Int(7), Some("0.00")), some("7.00"));
        assert_eq!(display_text(&text("007"), Some("0.00")), some("007"));
        assert_eq!(
            display_text(
                &Data::DateTimeIso("2024-01-15T00:00:00".to_string()),
                Some("yyyy-mm-dd")
            ),
            some("2024-01-15")
        );
    }

    #[test]
    fn test_formats_apply_by_cell_position() {
        let range = sheet(&[
            ((0, 0), text("Amount")),
            ((1, 0), Data::Float(1234.5)),
            ((2, 0), Data::Float(1234.5)),
        ]);
        let mut formats = CellFormats::default();
        formats.insert((2, 0), "#,##0.00");

        let dataset =
            dataset_from_sheet(Path::new("amounts.xlsx"), Some(range), &formats).unwrap();

        assert_eq!(dataset.rows[0].values, vec![some("1234.5")]);
        assert_eq!(dataset.rows[1].values, vec![some("1,234.50")]);
    }

    #[test]
    fn test_column_name() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(701), "ZZ");
        assert_eq!(column_name(702), "AAA");
    }

    #[test]
    fn test_unknown_container() {
        let err = open_first_sheet(Path::new("notes.txt"), b"just some text").unwrap_err();
        assert!(matches!(err, Error::InputFormat { .. }));
    }

    #[test]
    fn test_encrypted_package_detection() {
        let bytes = ole::build(&[("EncryptionInfo", b"info"), ("EncryptedPackage", b"data")]);

        assert!(is_encrypted_package(&bytes));
        let err = open_first_sheet(Path::new("locked.xlsx"), &bytes).unwrap_err();
        assert!(matches!(err, Error::Encrypted { .. }));
    }

    #[test]
    fn test_encrypted_package_name_in_cell_text_is_not_encryption() {
        let name: Vec<u8> = "EncryptedPackage"
            .encode_utf16()
            .flat_map(|unit| unit.to_le_bytes())
            .collect();
        let bytes = ole::build(&[("Workbook", &name)]);

        assert!(!is_encrypted_package(&bytes));
        let err = open_first_sheet(Path::new("plain.xls"), &bytes).unwrap_err();
        assert!(matches!(err, Error::InputFormat { .. }));
    }

    #[test]
    fn test_corrupt_zip_is_format_error() {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(b"garbage");
        let err = open_first_sheet(Path::new("broken.xlsx"), &bytes).unwrap_err();
        assert!(matches!(err, Error::InputFormat { .. }));
    }
}
