use csv::ByteRecord;

use crate::error::SortError;
use crate::key::Key;

/// Composite sort key: an ordered list of 0 based column indices.
///
/// Records are compared field by field in the order the columns are listed. Field values are
/// compared as raw bytes, which for UTF-8 text is codepoint order. Values are never coerced to
/// numbers, so `"10"` sorts before `"9"`.
///
/// # Examples
/// ```
/// use delimited_file_sort::sort_key::SortKey;
///
/// // sort by the third column, ties broken by the first
/// let sort_key = SortKey::new(vec![2, 0]).unwrap();
/// assert_eq!(sort_key.columns(), &[2, 0]);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    columns: Vec<usize>,
}

impl SortKey {
    /// Create a new [SortKey]. At least one column is required.
    ///
    /// Column indices are validated against record width only while sorting.
    pub fn new(columns: Vec<usize>) -> Result<SortKey, SortError> {
        if columns.is_empty() {
            return Err(SortError::invalid_parameter("sort_key_columns", "at least one column is required"));
        }
        Ok(SortKey { columns })
    }

    /// Get the key columns
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Extract the key from `record`. Fails with the first column missing in the record.
    pub(crate) fn extract(&self, record: &ByteRecord) -> Result<Key, usize> {
        let mut fields = Vec::with_capacity(self.columns.len());
        for &column in &self.columns {
            match record.get(column) {
                Some(field) => fields.push(field.to_vec()),
                None => return Err(column),
            }
        }
        Ok(Key::new(fields))
    }
}
