//! Entry point for loading merge data from any supported file type

use crate::error::Result;
use crate::parser::read_csv;
use crate::table::Dataset;
use crate::workbook::read_workbook;
use std::path::Path;
use tracing::info;

/// Read a `.csv`, `.xls` or `.xlsx` file into a Dataset.
///
/// The file extension decides the reader: `csv` (any case) is read as
/// delimited text, everything else as an Excel workbook. Blank rows are
/// removed before the dataset is returned.
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let mut dataset = if is_csv(path) {
        read_csv(path)?
    } else {
        read_workbook(path)?
    };

    let removed = dataset.remove_blank_rows();
    info!(
        "Loaded {} rows and {} columns from {} ({} empty rows removed)",
        dataset.row_count(),
        dataset.column_count(),
        path.display(),
        removed
    );
    Ok(dataset)
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
}
