//! Core dataset types shared by the data readers and the merge engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Headers and rows loaded from a CSV file or the first sheet of a workbook
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names in load order; `None` for a column without a title
    pub headers: Vec<Option<String>>,
    /// Data rows, each with exactly one value per header position
    pub rows: Vec<Row>,
    /// Source file path
    pub source_path: PathBuf,
}

impl Dataset {
    /// Create a new empty dataset
    pub fn new(source_path: PathBuf) -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
            source_path,
        }
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Position of the first header with exactly this name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.as_deref() == Some(name))
    }

    /// Append a row built from raw source values.
    ///
    /// The values are padded with `None` or truncated so the row lines up
    /// with the headers.
    pub fn push_row(&mut self, mut values: Vec<Option<String>>) {
        values.resize(self.headers.len(), None);
        self.rows.push(Row::new(values));
    }

    /// Drop every blank row, keeping the order of the remaining ones
    pub fn remove_blank_rows(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|row| {
            if row.is_blank() {
                info!("Removing an empty data line");
                false
            } else {
                true
            }
        });
        before - self.rows.len()
    }
}

/// A row of data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Cell values for each header position
    pub values: Vec<Option<String>>,
}

impl Row {
    /// Create a new row
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    /// Get a cell value by column index
    pub fn get(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|v| v.as_deref())
    }

    /// A row is blank when no value holds anything but whitespace
    pub fn is_blank(&self) -> bool {
        self.values
            .iter()
            .all(|v| v.as_deref().map_or(true, |s| s.trim().is_empty()))
    }
}
