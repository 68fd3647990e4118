//! mailmerge-core: Core library for merging tabular data into document templates
//!
//! This library provides functionality to:
//! - Read merge data from CSV or Excel (.xls/.xlsx) files into a uniform dataset
//! - Show spreadsheet numbers through each cell's number format
//! - Fill `${Header}` placeholders in a template once per data row
//! - Splice the filled sections into a single document body
//! - Load and write Word (.docx) templates

pub mod body;
pub mod document;
pub mod driver;
pub mod error;
pub mod merger;
pub mod numfmt;
pub mod ole;
pub mod parser;
pub mod source;
pub mod styles;
pub mod table;
pub mod workbook;

pub use body::{splice, split_body, BodyParts, TemplateBody};
pub use document::TemplateDocument;
pub use driver::merge_files;
pub use error::{Error, Result};
pub use merger::{apply_template, substitute, MergeContext, MergeSummary};
pub use numfmt::{format_general, format_number};
pub use parser::{read_csv, read_csv_str};
pub use source::read_dataset;
pub use table::{Dataset, Row};
pub use workbook::read_workbook;
