use std::cmp::Ordering;
use std::path::Path;

use csv::ByteRecord;

use crate::error::SortError;
use crate::key::Key;
use crate::sort_key::SortKey;

/// A parsed record together with its extracted sort key. Ordering and equality only look at the
/// key.
#[derive(Debug)]
pub(crate) struct LineRecord {
    record: ByteRecord,
    key: Key,
}

impl LineRecord {
    /// `path` is used for error reporting only
    pub(crate) fn new(record: ByteRecord, sort_key: &SortKey, path: &Path) -> Result<LineRecord, SortError> {
        match sort_key.extract(&record) {
            Ok(key) => Ok(LineRecord { record, key }),
            Err(column) => Err(
                SortError::Key {
                    path: path.to_path_buf(),
                    line: record.position().map(|p| p.line()).unwrap_or(0),
                    column,
                    fields: record.len(),
                }
            ),
        }
    }

    pub(crate) fn record(&self) -> &ByteRecord {
        &self.record
    }
}

impl Eq for LineRecord {}

impl PartialEq<Self> for LineRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl PartialOrd<Self> for LineRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LineRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}
