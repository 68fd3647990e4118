//! CSV reader for merge data files

use crate::error::{Error, Result};
use crate::table::Dataset;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Parse a CSV file into a Dataset.
///
/// Blank rows are kept here; [`crate::read_dataset`] removes them.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::unreadable(path, e))?;

    read_records(BufReader::new(file), path.to_path_buf())
}

/// Parse CSV from a string (useful for testing)
pub fn read_csv_str(content: &str, source_name: &str) -> Result<Dataset> {
    read_records(content.as_bytes(), PathBuf::from(source_name))
}

fn read_records<R: Read>(reader: R, path: PathBuf) -> Result<Dataset> {
    // Empty lines are skipped by the csv reader itself
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .comment(None)
        .trim(csv::Trim::All)
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()
        .map_err(|e| Error::format(&path, e))?
        .clone();

    let mut dataset = Dataset::new(path);
    for (index, name) in headers.iter().enumerate() {
        info!("Had header '{}' for column {}", name, index);
        dataset.headers.push(Some(name.to_string()));
    }

    for (row_idx, result) in csv_reader.records().enumerate() {
        let record = result.map_err(|e| Error::format(&dataset.source_path, e))?;

        if record.len() > dataset.column_count() {
            warn!(
                "row {} in {} has more cells than columns, truncating",
                row_idx + 1,
                dataset.source_path.display()
            );
        }

        let values = record.iter().map(|v| Some(v.to_string())).collect();
        dataset.push_row(values);
    }

    info!("Found {} lines", dataset.row_count());
    Ok(dataset)
}
