//! Error types for mailmerge-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading data or merging a template
#[derive(Debug, Error)]
pub enum Error {
    /// Template or data file is missing or not a regular file
    #[error("input file '{path}' does not exist or is not a regular file")]
    InputNotFound { path: PathBuf },

    /// The file cannot be opened, or its contents are not in a format we can read
    #[error("unsupported or corrupt file '{path}': {message}")]
    InputFormat { path: PathBuf, message: String },

    /// Password-protected workbooks and documents are not supported
    #[error("file '{path}' is encrypted, password protected files are not supported")]
    Encrypted { path: PathBuf },

    /// The workbook does not contain any sheet
    #[error("workbook '{path}' does not have any sheet")]
    MissingSheet { path: PathBuf },

    /// The first sheet has no row 0 to read headers from
    #[error("workbook '{path}' does not have data in the first row of the first sheet, but the header row is expected there")]
    MissingHeaderRow { path: PathBuf },

    /// The include-indicator column is configured but no header has that name
    #[error("include-indicator column '{column}' is not one of the data headers")]
    UnknownIncludeColumn { column: String },

    /// The template body does not have the `<prefix>content</suffix>` shape
    #[error("template body is malformed: {0}")]
    MalformedBody(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors caused by a missing or unreadable input file
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InputNotFound { .. }
                | Error::InputFormat { .. }
                | Error::Encrypted { .. }
                | Error::MissingSheet { .. }
                | Error::MissingHeaderRow { .. }
                | Error::MalformedBody(_)
        )
    }

    /// True for errors caused by the merge configuration rather than the inputs
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::UnknownIncludeColumn { .. })
    }

    pub(crate) fn format(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Error::InputFormat {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::format(path, format!("cannot be opened: {}", source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let missing = Error::InputNotFound {
            path: PathBuf::from("data.csv"),
        };
        assert!(missing.is_input_error());
        assert!(!missing.is_config_error());

        let column = Error::UnknownIncludeColumn {
            column: "Include".to_string(),
        };
        assert!(column.is_config_error());
        assert!(!column.is_input_error());
    }

    #[test]
    fn test_error_message_names_column() {
        let err = Error::UnknownIncludeColumn {
            column: "Include".to_string(),
        };
        assert!(err.to_string().contains("'Include'"));
    }

    #[test]
    fn test_unreadable_is_a_format_error() {
        let err = Error::unreadable(
            "data.csv",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, Error::InputFormat { .. }));
        assert!(err.is_input_error());
        assert!(err.to_string().contains("cannot be opened"));
    }
}
