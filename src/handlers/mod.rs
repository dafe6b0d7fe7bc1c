//! Per-extract metadata: raw/staging table names, ordered column lists,
//! natural keys and column transformations.
//!
//! The registry is built once at startup and read-only afterwards; services
//! take it by shared reference and never mutate it.

use std::collections::HashMap;
use std::sync::Arc;

mod builtin;

use crate::staging::transform::ColumnTransformation;

/// Everything the pipeline knows about one extract type.
///
/// `columns` is the declared source column order - field positions in the
/// delimited file map onto it one-to-one. `natural_keys` name the staging
/// columns that identify a logical record for dedup and upsert conflict.
#[derive(Clone)]
pub struct ExtractHandler {
    pub extract_type: String,
    /// Raw landing table, e.g. `raw.patients`
    pub table_name: String,
    /// Declared source columns in file order
    pub columns: Vec<&'static str>,
    /// Staging columns forming the natural key
    pub natural_keys: Vec<String>,
    /// Staging column holding the record's update timestamp, for dedup
    pub updated_at_column: Option<String>,
    pub transformations: Vec<ColumnTransformation>,
}

impl ExtractHandler {
    /// Staging target table, derived from the extract type
    pub fn staging_table(&self) -> String {
        format!("stg.{}", self.extract_type)
    }

    /// Target column names in transformation order
    pub fn target_columns(&self) -> Vec<String> {
        self.transformations
            .iter()
            .map(|t| t.target_column.clone())
            .collect()
    }
}

/// Process-wide handler registry keyed by extract type.
/// Constructed once, frozen thereafter.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<ExtractHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with all built-in extract definitions
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for handler in builtin::all() {
            registry.register(handler);
        }
        registry
    }

    pub fn register(&mut self, handler: ExtractHandler) {
        self.handlers
            .insert(handler.extract_type.clone(), Arc::new(handler));
    }

    pub fn get(&self, extract_type: &str) -> Option<Arc<ExtractHandler>> {
        self.handlers.get(extract_type).cloned()
    }

    pub fn extract_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
