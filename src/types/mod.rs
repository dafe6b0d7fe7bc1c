//! Shared types for the extract pipeline, organised by concern.

pub mod file;
pub mod results;
pub mod row;
pub mod runs;

pub use file::{DiscoveredFile, FileLineage};
pub use results::{
    BatchResult, LoadResult, RejectedRow, Severity, TransformResult, ValidationFailure,
};
pub use row::{ParsedRow, RawRecord};
pub use runs::{
    FileIngestRecord, LoadRun, LoadRunStatus, RunTrigger, StagingRun, StagingRunStatus,
};
