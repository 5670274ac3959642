/// Extracted composite key of one record, compared lexicographically field by field.
///
/// All keys built from the same [crate::sort_key::SortKey] have the same number of fields, so
/// the derived ordering is exactly the composite key ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Key {
    fields: Vec<Vec<u8>>,
}

impl Key {
    pub(crate) fn new(fields: Vec<Vec<u8>>) -> Key {
        Key {
            fields,
        }
    }
}
