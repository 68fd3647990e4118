//! Merge engine: fills the template once per data row and concatenates the
//! results into a single body

use crate::body::{splice, TemplateBody};
use crate::error::{Error, Result};
use crate::table::{Dataset, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Start of a placeholder; anything left after substitution is unresolved
const PLACEHOLDER_START: &str = "${";

/// Settings for one merge run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeContext {
    /// Header whose value decides whether a row is merged.
    ///
    /// When set, only rows holding `1` or `true` (any case) in this column
    /// are merged.
    pub include_indicator_column: Option<String>,
}

impl MergeContext {
    /// Create a context that merges every row
    pub fn new() -> Self {
        Self::default()
    }

    /// Only merge rows flagged in the given column
    pub fn with_include_indicator(column: impl Into<String>) -> Self {
        Self {
            include_indicator_column: Some(column.into()),
        }
    }
}

/// What happened during a merge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSummary {
    /// Rows in the dataset
    pub rows_total: usize,
    /// Rows spliced into the body
    pub rows_merged: usize,
    /// Rows left out by the include indicator
    pub rows_skipped: usize,
    /// Dataset indices of merged rows that still contained `${`
    pub unresolved_rows: Vec<usize>,
}

/// Merge every eligible row of `dataset` into `body`.
///
/// The content of `body` is captured just before the first eligible row and
/// used as the template for each row. The first merged row replaces the
/// template content, later rows are appended. If no row is eligible the body
/// is left untouched and never inspected.
pub fn apply_template(
    body: &mut TemplateBody,
    dataset: &Dataset,
    context: &MergeContext,
) -> Result<MergeSummary> {
    let include_column = match &context.include_indicator_column {
        Some(name) => Some(dataset.find_column(name).ok_or_else(|| {
            Error::UnknownIncludeColumn {
                column: name.clone(),
            }
        })?),
        None => None,
    };

    let mut template: Option<String> = None;
    let mut summary = MergeSummary {
        rows_total: dataset.row_count(),
        ..Default::default()
    };

    for (index, row) in dataset.rows.iter().enumerate() {
        if let Some(column) = include_column {
            if !is_included(row.get(column)) {
                info!("Skipping row {} because the include indicator is not set", index + 1);
                summary.rows_skipped += 1;
                continue;
            }
        }

        if template.is_none() {
            template = Some(body.parts()?.content.to_string());
        }
        let pristine = template.as_deref().unwrap_or_default();
        let section = substitute(pristine, &dataset.headers, row);
        if section.contains(PLACEHOLDER_START) {
            warn!("Found template markers that could not be replaced: {}", section);
            summary.unresolved_rows.push(index);
        }

        let text = splice(body.raw_text(), &section, summary.rows_merged == 0)?;
        debug!("Merged row {} ({} bytes of body)", index + 1, text.len());
        body.replace(text);
        summary.rows_merged += 1;
    }

    info!(
        "Merged {} of {} rows ({} skipped)",
        summary.rows_merged, summary.rows_total, summary.rows_skipped
    );
    Ok(summary)
}

/// Replace `${header}` with the row's value for every named header, in
/// header order. Each replacement runs over the result of the previous one.
pub fn substitute(template: &str, headers: &[Option<String>], row: &Row) -> String {
    let mut text = template.to_string();
    for (position, header) in headers.iter().enumerate() {
        let Some(name) = header else {
            continue;
        };
        let placeholder = format!("${{{}}}", name);
        text = text.replace(&placeholder, row.get(position).unwrap_or(""));
    }
    text
}

fn is_included(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}
