//! Error kinds surfaced by the sort pipeline.
//!
//! Every error is fatal to a run. The pipeline never retries and never cleans up the workspace
//! after a failure, so the workspace path is logged and left for inspection.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for sort operations
pub type Result<T> = std::result::Result<T, SortError>;

/// Error type for sort operations
#[derive(Error, Debug)]
pub enum SortError {
    /// The workspace directory already exists, most likely left behind by an unfinished run
    #[error("Workspace already exists: {}", path.display())]
    WorkspaceConflict {
        /// The conflicting workspace path
        path: PathBuf,
    },

    /// Read, write, rename or remove failure on any file
    #[error("I/O error, {context}: {source}")]
    Io {
        /// What was being done and on which path
        context: String,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// A record could not be framed or parsed according to the quoting rules
    #[error("Malformed record in {}, line {line}: {reason}", path.display())]
    Parse {
        /// File containing the record
        path: PathBuf,
        /// Line where the record starts, 1 based
        line: u64,
        /// Explanation of the problem
        reason: String,
    },

    /// A sort key column does not exist in some record
    #[error("Sort key column {column} out of range in {}, line {line}: record has {fields} fields", path.display())]
    Key {
        /// File containing the record
        path: PathBuf,
        /// Line where the record starts, 1 based
        line: u64,
        /// The offending key column, 0 based
        column: usize,
        /// Number of fields in the record
        fields: usize,
    },

    /// A pooled task terminated abnormally
    #[error("Worker failure: {reason}")]
    WorkerFailure {
        /// Explanation of the failure
        reason: String,
    },

    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },
}

impl SortError {
    pub(crate) fn io(context: String, source: std::io::Error) -> SortError {
        SortError::Io { context, source }
    }

    pub(crate) fn invalid_parameter(parameter: &str, reason: &str) -> SortError {
        SortError::InvalidParameter {
            parameter: parameter.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify a [csv::Error] raised while reading or writing `path`
    pub(crate) fn csv(path: &Path, error: csv::Error) -> SortError {
        let line = error.position().map(|p| p.line()).unwrap_or(0);
        let reason = error.to_string();
        match error.into_kind() {
            csv::ErrorKind::Io(source) => SortError::io(format!("path: {}", path.display()), source),
            _ => SortError::Parse {
                path: path.to_path_buf(),
                line,
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_workspace_conflict() {
        let error = SortError::WorkspaceConflict { path: PathBuf::from("/tmp/ws") };
        assert_eq!(format!("{error}"), "Workspace already exists: /tmp/ws");
    }

    #[test]
    fn test_key_error() {
        let error = SortError::Key {
            path: PathBuf::from("chunk-00000001.csv"),
            line: 7,
            column: 3,
            fields: 2,
        };
        let msg = format!("{error}");
        assert!(msg.contains("column 3"));
        assert!(msg.contains("line 7"));
        assert!(msg.contains("2 fields"));
    }

    #[test]
    fn test_csv_io_error_is_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let error = SortError::csv(&PathBuf::from("a.csv"), csv::Error::from(io));
        assert!(matches!(error, SortError::Io { .. }));
    }

    #[test]
    fn test_invalid_parameter() {
        let error = SortError::invalid_parameter("fan_in", "must be at least 2");
        let msg = format!("{error}");
        assert!(msg.contains("'fan_in'"));
        assert!(msg.contains("at least 2"));
    }
}
