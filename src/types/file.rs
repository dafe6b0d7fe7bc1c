use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A source artifact discovered in object storage.
///
/// Produced by the discovery collaborator (out of scope here); the pipeline
/// treats it as opaque apart from these fields. The triple
/// `(key, version_id, content_hash)` identifies a unique ingestable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredFile {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub content_hash: String,
    pub extracted_date: NaiveDate,
    pub extract_type: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Lineage stamped onto every raw row via the `load_run_files` ledger.
///
/// Immutable once written; raw rows reference it through the `load_run_file_id`
/// foreign key rather than carrying the tuple inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLineage {
    pub bucket: String,
    pub key: String,
    pub version_id: String,
    pub content_hash: String,
    pub extracted_date: NaiveDate,
    pub extract_type: String,
    pub load_run_id: Uuid,
    pub load_ts: DateTime<Utc>,
}

impl FileLineage {
    /// Build the lineage tuple for a file under a given load run.
    pub fn for_file(file: &DiscoveredFile, load_run_id: Uuid) -> Self {
        Self {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            version_id: file.version_id.clone(),
            content_hash: file.content_hash.clone(),
            extracted_date: file.extracted_date,
            extract_type: file.extract_type.clone(),
            load_run_id,
            load_ts: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> DiscoveredFile {
        DiscoveredFile {
            bucket: "extracts".to_string(),
            key: "2025/07/patients.csv".to_string(),
            version_id: "v7".to_string(),
            content_hash: "abc123".to_string(),
            extracted_date: NaiveDate::from_ymd_opt(2025, 7, 14).unwrap(),
            extract_type: "patients".to_string(),
            size: 1024,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn test_lineage_carries_file_identity() {
        let file = sample_file();
        let run_id = Uuid::new_v4();
        let lineage = FileLineage::for_file(&file, run_id);

        assert_eq!(lineage.bucket, file.bucket);
        assert_eq!(lineage.key, file.key);
        assert_eq!(lineage.version_id, file.version_id);
        assert_eq!(lineage.content_hash, file.content_hash);
        assert_eq!(lineage.extract_type, file.extract_type);
        assert_eq!(lineage.load_run_id, run_id);
    }
}
