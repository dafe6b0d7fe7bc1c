/// One framed row out of the delimited parser.
///
/// Fields are positional; the extract handler owns the mapping from position
/// to column name. Carrying a `Vec<String>` instead of a name→value map keeps
/// the hot path free of per-row hashing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-based position within the file, in byte-stream order
    pub row_number: u64,
    /// Cleaned field values in source order
    pub fields: Vec<String>,
}

impl ParsedRow {
    pub fn new(row_number: u64, fields: Vec<String>) -> Self {
        Self { row_number, fields }
    }

    /// Field at a column position, if the source row was wide enough.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }

    /// True when every field is empty after cleaning (skippable row).
    pub fn is_blank(&self) -> bool {
        self.fields.iter().all(|f| f.is_empty())
    }
}

/// One row read back from a raw landing table.
///
/// `fields` are in the handler's declared column order; all values are text
/// exactly as landed (raw fidelity). `id` is the raw table's surrogate key
/// and `file_id` the lineage FK the row was landed under.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: i64,
    pub file_id: i64,
    pub fields: Vec<Option<String>>,
}

impl RawRecord {
    /// Value of the column at `index`, treating NULL and absent alike.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).and_then(|f| f.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_row_detection() {
        assert!(ParsedRow::new(1, vec![]).is_blank());
        assert!(ParsedRow::new(1, vec!["".into(), "".into()]).is_blank());
        assert!(!ParsedRow::new(1, vec!["".into(), "x".into()]).is_blank());
    }

    #[test]
    fn test_field_access_out_of_range() {
        let row = ParsedRow::new(3, vec!["a".into()]);
        assert_eq!(row.field(0), Some("a"));
        assert_eq!(row.field(1), None);
    }
}
