use mailmerge_core::{
    merge_files, read_dataset, Error, MergeContext, TemplateDocument,
};
use rust_xlsxwriter::{Format, Workbook};
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const PARAGRAPH: &str = "<w:p><w:r><w:t>Hello ${Name} from ${City}.</w:t></w:r></w:p>";

fn document_xml(content: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
            "<w:body>{}</w:body></w:document>"
        ),
        content
    )
}

fn write_template(dir: &TempDir, content: &str) -> PathBuf {
    write_document(dir, &document_xml(content))
}

fn write_document(dir: &TempDir, xml: &str) -> PathBuf {
    let mut out = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    out.start_file("[Content_Types].xml", options).unwrap();
    out.write_all(b"<Types/>").unwrap();
    out.start_file("word/document.xml", options).unwrap();
    out.write_all(xml.as_bytes()).unwrap();
    out.start_file("word/styles.xml", options).unwrap();
    out.write_all(b"<w:styles/>").unwrap();
    let bytes = out.finish().unwrap().into_inner();

    let path = dir.path().join("Template.docx");
    fs::write(&path, bytes).unwrap();
    path
}

fn write_csv(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("Lines.csv");
    fs::write(&path, content).unwrap();
    path
}

fn merged_body(path: &Path) -> String {
    TemplateDocument::open(path)
        .unwrap()
        .body()
        .raw_text()
        .to_string()
}

#[test]
fn test_csv_merge_skips_blank_rows() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, "Hello ${Name} from ${City}.");
    let data = write_csv(&dir, "Name,City\nAnn,NYC\n,\nBob,LA\n");
    let output = dir.path().join("Result.docx");

    let summary = merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    assert_eq!(summary.rows_merged, 2);
    assert_eq!(
        merged_body(&output),
        "<w:body>Hello Ann from NYC.Hello Bob from LA.</w:body>"
    );
}

#[test]
fn test_merged_document_keeps_single_wrapper() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, PARAGRAPH);
    let data = write_csv(&dir, "Name,City\nAnn,NYC\nBob,LA\nCid,SF\n");
    let output = dir.path().join("Result.docx");

    merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    let document = TemplateDocument::open(&output).unwrap();
    let xml = document.document_xml();
    assert_eq!(xml.matches("<w:body>").count(), 1);
    assert_eq!(xml.matches("</w:body>").count(), 1);
    assert_eq!(xml.matches("<w:p>").count(), 3);
    assert!(xml.contains("Hello Cid from SF."));
    assert!(!xml.contains("${"));
}

#[test]
fn test_include_indicator_from_workbook() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, "Hello ${Name} from ${City}.");
    let data = dir.path().join("Lines.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, header) in ["Name", "City", "Include"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for (row, flag) in ["1", "0", "true"].iter().enumerate() {
        let row = row as u32 + 1;
        sheet.write_string(row, 0, "Ann").unwrap();
        sheet.write_string(row, 1, "NYC").unwrap();
        sheet.write_string(row, 2, *flag).unwrap();
    }
    workbook.save(&data).unwrap();

    let output = dir.path().join("Result.docx");
    let summary = merge_files(
        &template,
        &data,
        &output,
        &MergeContext::with_include_indicator("Include"),
    )
    .unwrap();

    assert_eq!(summary.rows_merged, 2);
    assert_eq!(summary.rows_skipped, 1);
    assert_eq!(
        merged_body(&output),
        "<w:body>Hello Ann from NYC.Hello Ann from NYC.</w:body>"
    );
}

#[test]
fn test_unknown_include_column_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, PARAGRAPH);
    let data = write_csv(&dir, "Name,City\nAnn,NYC\n");
    let output = dir.path().join("Result.docx");

    let err = merge_files(
        &template,
        &data,
        &output,
        &MergeContext::with_include_indicator("Include"),
    )
    .unwrap_err();

    assert!(err.is_config_error());
    assert!(!output.exists());
}

#[test]
fn test_failed_merge_leaves_previous_output() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, PARAGRAPH);
    let data = write_csv(&dir, "Name,City\nAnn,NYC\n");
    let output = dir.path().join("Result.docx");
    fs::write(&output, b"previous").unwrap();

    let result = merge_files(
        &template,
        &data,
        &output,
        &MergeContext::with_include_indicator("Missing"),
    );

    assert!(result.is_err());
    assert_eq!(fs::read(&output).unwrap(), b"previous");
}

#[test]
fn test_unresolved_placeholder_is_not_fatal() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, "${Name} ${Unknown};");
    let data = write_csv(&dir, "Name\nAnn\n");
    let output = dir.path().join("Result.docx");

    let summary = merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    assert_eq!(summary.unresolved_rows, vec![0]);
    assert_eq!(merged_body(&output), "<w:body>Ann ${Unknown};</w:body>");
}

#[test]
fn test_no_rows_writes_template_unchanged() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, PARAGRAPH);
    let data = write_csv(&dir, "Name,City\n");
    let output = dir.path().join("Result.docx");

    merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    assert_eq!(
        TemplateDocument::open(&output).unwrap().document_xml(),
        document_xml(PARAGRAPH)
    );
}

#[test]
fn test_read_workbook_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Values.xlsx");

    let mut workbook = Workbook::new();
    let date = Format::new().set_num_format("yyyy-mm-dd");
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Name").unwrap();
    sheet.write_string(0, 1, "Count").unwrap();
    sheet.write_string(0, 2, "Date").unwrap();
    sheet.write_string(1, 0, "Ann").unwrap();
    sheet.write_number(1, 1, 42.0).unwrap();
    sheet.write_number_with_format(1, 2, 45306.0, &date).unwrap();
    sheet.write_string(2, 0, "   ").unwrap();
    sheet.write_string(4, 0, "Bob").unwrap();
    sheet.write_number(4, 1, 2.5).unwrap();
    workbook.save(&path).unwrap();

    let dataset = read_dataset(&path).unwrap();

    let some = |s: &str| Some(s.to_string());
    assert_eq!(dataset.headers, vec![some("Name"), some("Count"), some("Date")]);
    assert_eq!(dataset.row_count(), 2);
    assert_eq!(
        dataset.rows[0].values,
        vec![some("Ann"), some("42"), some("2024-01-15")]
    );
    assert_eq!(dataset.rows[1].values, vec![some("Bob"), some("2.5"), None]);
}

#[test]
fn test_read_workbook_number_formats() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Formats.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let cases = [
        ("Price", Some("$#,##0.00"), 1234.5),
        ("Share", Some("0%"), 0.25),
        ("Third", None, 1.0 / 3.0),
        ("Fixed", Some("0.00"), 7.0),
    ];
    for (col, (header, code, value)) in cases.iter().enumerate() {
        let col = col as u16;
        sheet.write_string(0, col, *header).unwrap();
        match code {
            Some(code) => {
                let format = Format::new().set_num_format(*code);
                sheet.write_number_with_format(1, col, *value, &format).unwrap();
            }
            None => {
                sheet.write_number(1, col, *value).unwrap();
            }
        }
    }
    workbook.save(&path).unwrap();

    let dataset = read_dataset(&path).unwrap();

    assert_eq!(
        dataset.rows[0].values,
        vec![
            Some("$1,234.50".to_string()),
            Some("25%".to_string()),
            Some("0.333333333".to_string()),
            Some("7.00".to_string()),
        ]
    );
}

#[test]
fn test_read_legacy_xls() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/people.xls");

    let dataset = read_dataset(&path).unwrap();

    let some = |s: &str| Some(s.to_string());
    assert_eq!(
        dataset.headers,
        vec![some("Name"), some("City"), some("Amount"), some("Joined")]
    );
    assert_eq!(dataset.row_count(), 2);
    assert_eq!(
        dataset.rows[0].values,
        vec![some("Ann"), some("NYC"), some("1,234.50"), some("1/15/24")]
    );
    assert_eq!(
        dataset.rows[1].values,
        vec![some("Bob"), some("LA"), some("0.333333333"), None]
    );
}

#[test]
fn test_merge_from_legacy_xls() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, "${Name} owes ${Amount} since ${Joined}.");
    let data = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/people.xls");
    let output = dir.path().join("Result.docx");

    let summary = merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    assert_eq!(summary.rows_merged, 2);
    assert!(merged_body(&output).starts_with("<w:body>Ann owes 1,234.50 since 1/15/24."));
}

#[test]
fn test_markup_in_data_is_rejected_before_writing() {
    let dir = TempDir::new().unwrap();
    let template = write_template(&dir, "<w:p><w:r><w:t>${Name}</w:t></w:r></w:p>");
    let data = write_csv(&dir, "Name\nTom & Jerry <3\n");
    let output = dir.path().join("Result.docx");

    let err = merge_files(&template, &data, &output, &MergeContext::new()).unwrap_err();

    assert!(matches!(err, Error::MalformedBody(_)), "{}", err);
    assert!(!output.exists());
}

#[test]
fn test_self_closing_body_without_rows() {
    let dir = TempDir::new().unwrap();
    let xml = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">"#,
        "<w:body/></w:document>"
    );
    let template = write_document(&dir, xml);
    let data = write_csv(&dir, "Name,City\n");
    let output = dir.path().join("Result.docx");

    let summary = merge_files(&template, &data, &output, &MergeContext::new()).unwrap();

    assert_eq!(summary.rows_merged, 0);
    assert_eq!(TemplateDocument::open(&output).unwrap().document_xml(), xml);
}

#[test]
fn test_read_workbook_with_empty_header_cell() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Gaps.xlsx");

    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.write_string(0, 0, "Name").unwrap();
    sheet.write_string(0, 2, "City").unwrap();
    sheet.write_string(1, 0, "Ann").unwrap();
    sheet.write_string(1, 1, "unnamed").unwrap();
    sheet.write_string(1, 2, "NYC").unwrap();
    workbook.save(&path).unwrap();

    let dataset = read_dataset(&path).unwrap();

    assert_eq!(dataset.headers[1], None);
    assert_eq!(dataset.rows[0].get(1), Some("unnamed"));
}

#[test]
fn test_corrupt_workbook() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("Broken.xlsx");
    fs::write(&path, b"this is not a workbook").unwrap();

    let err = read_dataset(&path).unwrap_err();
    assert!(matches!(err, Error::InputFormat { .. }));
    assert!(err.is_input_error());
}
