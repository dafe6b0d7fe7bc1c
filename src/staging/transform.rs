//! Per-column coercion from raw text to typed staging values.
//!
//! Each extract declares a list of `ColumnTransformation`s; one generic
//! engine consumes them. Coercion failures collect into validation failures
//! for the rejection trail rather than aborting the batch.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TransformationConfig;
use crate::handlers::ExtractHandler;
use crate::types::{RawRecord, Severity, ValidationFailure};

use super::validate::ValidationRule;

/// Target SQL types supported by the staging layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Text => "TEXT",
            TargetType::Integer => "INTEGER",
            TargetType::Decimal => "DECIMAL",
            TargetType::Boolean => "BOOLEAN",
            TargetType::Date => "DATE",
            TargetType::Timestamp => "TIMESTAMP",
            TargetType::Uuid => "UUID",
            TargetType::Json => "JSON",
        }
    }
}

/// A coerced value ready to bind into a staging upsert
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Text(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl TypedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }

    /// Stable text rendering, used for dedup keys and failure reporting
    pub fn render(&self) -> String {
        match self {
            TypedValue::Null => String::new(),
            TypedValue::Text(s) => s.clone(),
            TypedValue::Integer(i) => i.to_string(),
            TypedValue::Decimal(d) => d.to_string(),
            TypedValue::Boolean(b) => b.to_string(),
            TypedValue::Date(d) => d.to_string(),
            TypedValue::Timestamp(t) => t.to_rfc3339(),
            TypedValue::Uuid(u) => u.to_string(),
            TypedValue::Json(j) => j.to_string(),
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            TypedValue::Timestamp(t) => Some(*t),
            _ => None,
        }
    }
}

/// Tagged pre-coercion string transforms - the configurable stand-in for
/// arbitrary per-column functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueTransform {
    Uppercase,
    Lowercase,
    Trim,
    DigitsOnly,
}

impl ValueTransform {
    pub fn apply(&self, value: &str) -> String {
        match self {
            ValueTransform::Uppercase => value.to_uppercase(),
            ValueTransform::Lowercase => value.to_lowercase(),
            ValueTransform::Trim => value.trim().to_string(),
            ValueTransform::DigitsOnly => value.chars().filter(|c| c.is_ascii_digit()).collect(),
        }
    }
}

/// How one source column lands in staging
#[derive(Clone)]
pub struct ColumnTransformation {
    pub source_column: String,
    pub target_column: String,
    pub target_type: TargetType,
    pub required: bool,
    pub default_value: Option<String>,
    pub transform: Option<ValueTransform>,
    pub rules: Vec<ValidationRule>,
}

impl ColumnTransformation {
    pub fn new(source: &str, target: &str, target_type: TargetType) -> Self {
        Self {
            source_column: source.to_string(),
            target_column: target.to_string(),
            target_type,
            required: false,
            default_value: None,
            transform: None,
            rules: Vec::new(),
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    pub fn with_transform(mut self, transform: ValueTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// One row after coercion, parallel to the handler's transformation list
#[derive(Debug, Clone)]
pub struct TransformedRow {
    /// Surrogate key of the source raw row
    pub raw_id: i64,
    /// Lineage FK the source raw row was landed under
    pub lineage_fk: i64,
    /// Ordinal of the row within this transform's scan
    pub row_number: i64,
    /// Target column names, shared across all rows of a batch
    pub columns: Arc<Vec<String>>,
    pub values: Vec<TypedValue>,
}

impl TransformedRow {
    /// Value by target column name (linear scan - extracts have tens of
    /// columns, not thousands)
    pub fn get(&self, column: &str) -> Option<&TypedValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }
}

/// Result of transforming one raw row
pub struct RowTransform {
    pub row: Option<TransformedRow>,
    pub failures: Vec<ValidationFailure>,
}

impl RowTransform {
    pub fn is_success(&self) -> bool {
        self.row.is_some()
    }
}

/// Generic coercion engine driven by an extract's transformation list
pub struct TransformEngine {
    config: TransformationConfig,
    /// Source field index for each transformation, resolved once
    source_indices: Vec<Option<usize>>,
    target_columns: Arc<Vec<String>>,
}

impl TransformEngine {
    pub fn new(handler: &ExtractHandler, config: &TransformationConfig) -> Self {
        let source_indices = handler
            .transformations
            .iter()
            .map(|t| handler.columns.iter().position(|c| *c == t.source_column))
            .collect();
        let target_columns = Arc::new(
            handler
                .transformations
                .iter()
                .map(|t| t.target_column.clone())
                .collect::<Vec<_>>(),
        );
        Self {
            config: config.clone(),
            source_indices,
            target_columns,
        }
    }

    pub fn target_columns(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.target_columns)
    }

    /// Coerce one raw record through every column transformation.
    ///
    /// Processing order per column: pre-process (trim / empty-to-null) →
    /// tagged transform → null handling (required/default) → type coercion.
    /// All failing columns are reported, not just the first.
    pub fn transform_row(
        &self,
        record: &RawRecord,
        transformations: &[ColumnTransformation],
        row_number: i64,
    ) -> RowTransform {
        let mut values = Vec::with_capacity(transformations.len());
        let mut failures = Vec::new();

        for (i, t) in transformations.iter().enumerate() {
            let raw_value = self.source_indices[i]
                .and_then(|idx| record.field(idx))
                .map(str::to_string);

            match self.coerce_column(t, raw_value) {
                Ok(value) => values.push(value),
                Err(failure) => {
                    failures.push(failure);
                    values.push(TypedValue::Null);
                }
            }
        }

        let blocking = failures.iter().any(|f| f.severity == Severity::Error);
        RowTransform {
            row: if blocking {
                None
            } else {
                Some(TransformedRow {
                    raw_id: record.id,
                    lineage_fk: record.file_id,
                    row_number,
                    columns: Arc::clone(&self.target_columns),
                    values,
                })
            },
            failures,
        }
    }

    fn coerce_column(
        &self,
        t: &ColumnTransformation,
        raw: Option<String>,
    ) -> Result<TypedValue, ValidationFailure> {
        // 1. Pre-process
        let mut value = raw;
        if let Some(s) = value.as_mut() {
            if self.config.trim_strings {
                *s = s.trim().to_string();
            }
        }
        if self.config.nullify_empty_strings {
            if let Some(s) = &value {
                if s.is_empty() {
                    value = None;
                }
            }
        }

        // 2. Tagged transform
        if let (Some(transform), Some(s)) = (&t.transform, value.as_ref()) {
            value = Some(transform.apply(s));
        }

        // 3. Null handling
        let value = match value {
            Some(v) => v,
            None => match &t.default_value {
                Some(default) => default.clone(),
                None => {
                    if t.required {
                        return Err(ValidationFailure::error(
                            &t.target_column,
                            "required",
                            format!("required column {} is null", t.source_column),
                        ));
                    }
                    return Ok(TypedValue::Null);
                }
            },
        };

        // 4. Coerce
        if !self.config.enable_type_coercion {
            return Ok(TypedValue::Text(value));
        }
        self.coerce_value(t, &value)
    }

    fn coerce_value(
        &self,
        t: &ColumnTransformation,
        value: &str,
    ) -> Result<TypedValue, ValidationFailure> {
        let format_failure = |message: String| {
            ValidationFailure::error(&t.target_column, "format", message)
                .with_actual(value.to_string())
                .with_expected(t.target_type.as_str().to_string())
        };

        match t.target_type {
            TargetType::Text => Ok(TypedValue::Text(value.to_string())),
            TargetType::Integer => parse_integer(value)
                .map(TypedValue::Integer)
                .ok_or_else(|| format_failure(format!("'{}' is not an integer", value))),
            TargetType::Decimal => parse_decimal(value, self.config.decimal_precision)
                .map(TypedValue::Decimal)
                .ok_or_else(|| format_failure(format!("'{}' is not a decimal", value))),
            TargetType::Boolean => parse_boolean(value)
                .map(TypedValue::Boolean)
                .ok_or_else(|| format_failure(format!("'{}' is not a boolean", value))),
            TargetType::Date => parse_date(value, &self.config.date_format)
                .map(TypedValue::Date)
                .ok_or_else(|| format_failure(format!("'{}' is not a date", value))),
            TargetType::Timestamp => parse_timestamp(value, &self.config.timestamp_format)
                .map(TypedValue::Timestamp)
                .ok_or_else(|| format_failure(format!("'{}' is not a timestamp", value))),
            TargetType::Uuid => parse_uuid(value)
                .map(TypedValue::Uuid)
                .ok_or_else(|| format_failure(format!("'{}' is not a canonical UUID", value))),
            TargetType::Json => serde_json::from_str(value)
                .map(TypedValue::Json)
                .map_err(|e| format_failure(format!("invalid JSON: {}", e))),
        }
    }
}

/// Base-10 integer; numeric strings with a fractional part floor toward
/// negative infinity, matching SQL casting of numeric literals.
fn parse_integer(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f.floor() as i64),
        _ => None,
    }
}

fn parse_decimal(value: &str, precision: u32) -> Option<f64> {
    match value.trim().parse::<f64>() {
        Ok(f) if f.is_finite() => {
            let factor = 10f64.powi(precision as i32);
            Some((f * factor).round() / factor)
        }
        _ => None,
    }
}

const TRUE_SET: [&str; 6] = ["true", "1", "yes", "y", "t", "on"];
const FALSE_SET: [&str; 6] = ["false", "0", "no", "n", "f", "off"];

fn parse_boolean(value: &str) -> Option<bool> {
    let lowered = value.trim().to_lowercase();
    if TRUE_SET.contains(&lowered.as_str()) {
        Some(true)
    } else if FALSE_SET.contains(&lowered.as_str()) {
        Some(false)
    } else {
        None
    }
}

fn parse_date(value: &str, configured_format: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if let Ok(d) = NaiveDate::parse_from_str(trimmed, configured_format) {
        return Some(d);
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y%m%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(d);
        }
    }
    // Full timestamps reduce to their date part
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|t| t.date_naive())
}

fn parse_timestamp(value: &str, configured_format: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(t) = NaiveDateTime::parse_from_str(trimmed, configured_format) {
        return Some(Utc.from_utc_datetime(&t));
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&t));
        }
    }
    // Date-only values land at midnight UTC
    parse_date(trimmed, "%Y-%m-%d").and_then(|d| d.and_hms_opt(0, 0, 0).map(|t| Utc.from_utc_datetime(&t)))
}

/// Canonical 8-4-4-4-12 hyphenated form only
fn parse_uuid(value: &str) -> Option<Uuid> {
    let trimmed = value.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() != 36
        || bytes[8] != b'-'
        || bytes[13] != b'-'
        || bytes[18] != b'-'
        || bytes[23] != b'-'
    {
        return None;
    }
    Uuid::parse_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::handlers::ExtractHandler;

    fn engine_for(transformations: Vec<ColumnTransformation>) -> (TransformEngine, ExtractHandler) {
        let handler = ExtractHandler {
            extract_type: "test".to_string(),
            table_name: "raw.test".to_string(),
            columns: vec!["patient_id", "dob", "is_active", "score", "updated_at"],
            natural_keys: vec!["patient_id".to_string()],
            updated_at_column: Some("updated_at".to_string()),
            transformations,
        };
        let config = AppConfig::defaults().transformation;
        let engine = TransformEngine::new(&handler, &config);
        (engine, handler)
    }

    fn record(fields: Vec<Option<&str>>) -> RawRecord {
        RawRecord {
            id: 1,
            file_id: 1,
            fields: fields.into_iter().map(|f| f.map(str::to_string)).collect(),
        }
    }

    #[test]
    fn test_text_date_boolean_row() {
        let transformations = vec![
            ColumnTransformation::new("patient_id", "patient_id", TargetType::Text).required(),
            ColumnTransformation::new("dob", "dob", TargetType::Date),
            ColumnTransformation::new("is_active", "is_active", TargetType::Boolean),
        ];
        let (engine, handler) = engine_for(transformations);

        let result = engine.transform_row(
            &record(vec![Some("12345"), Some("1990-08-20"), Some("true")]),
            &handler.transformations,
            1,
        );

        assert!(result.is_success());
        let row = result.row.unwrap();
        assert_eq!(row.get("patient_id"), Some(&TypedValue::Text("12345".into())));
        assert_eq!(
            row.get("dob"),
            Some(&TypedValue::Date(
                NaiveDate::from_ymd_opt(1990, 8, 20).unwrap()
            ))
        );
        assert_eq!(row.get("is_active"), Some(&TypedValue::Boolean(true)));
    }

    #[test]
    fn test_invalid_date_blocks_row() {
        let transformations = vec![
            ColumnTransformation::new("patient_id", "patient_id", TargetType::Text).required(),
            ColumnTransformation::new("dob", "dob", TargetType::Date),
        ];
        let (engine, handler) = engine_for(transformations);

        let result = engine.transform_row(
            &record(vec![Some("12345"), Some("not-a-date")]),
            &handler.transformations,
            1,
        );

        assert!(!result.is_success());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].column, "dob");
        assert_eq!(result.failures[0].severity, Severity::Error);
    }

    #[test]
    fn test_required_null_fails_without_default() {
        let transformations =
            vec![ColumnTransformation::new("patient_id", "patient_id", TargetType::Text).required()];
        let (engine, handler) = engine_for(transformations);

        let result = engine.transform_row(&record(vec![None]), &handler.transformations, 1);
        assert!(!result.is_success());
        assert_eq!(result.failures[0].rule, "required");
    }

    #[test]
    fn test_default_satisfies_required() {
        let transformations = vec![ColumnTransformation::new(
            "is_active",
            "is_active",
            TargetType::Boolean,
        )
        .required()
        .with_default("false")];
        let handler = ExtractHandler {
            extract_type: "test".to_string(),
            table_name: "raw.test".to_string(),
            columns: vec!["is_active"],
            natural_keys: vec![],
            updated_at_column: None,
            transformations,
        };
        let config = AppConfig::defaults().transformation;
        let engine = TransformEngine::new(&handler, &config);

        let result = engine.transform_row(&record(vec![None]), &handler.transformations, 1);
        let row = result.row.unwrap();
        assert_eq!(row.get("is_active"), Some(&TypedValue::Boolean(false)));
    }

    #[test]
    fn test_empty_string_nullifies() {
        let transformations = vec![ColumnTransformation::new("dob", "dob", TargetType::Date)];
        let handler = ExtractHandler {
            extract_type: "test".to_string(),
            table_name: "raw.test".to_string(),
            columns: vec!["dob"],
            natural_keys: vec![],
            updated_at_column: None,
            transformations,
        };
        let config = AppConfig::defaults().transformation;
        let engine = TransformEngine::new(&handler, &config);

        let result = engine.transform_row(&record(vec![Some("   ")]), &handler.transformations, 1);
        let row = result.row.unwrap();
        assert_eq!(row.get("dob"), Some(&TypedValue::Null));
    }

    #[test]
    fn test_integer_parsing() {
        assert_eq!(parse_integer("42"), Some(42));
        assert_eq!(parse_integer("-7"), Some(-7));
        assert_eq!(parse_integer("3.9"), Some(3));
        assert_eq!(parse_integer("-3.1"), Some(-4)); // floor, not truncate
        assert_eq!(parse_integer("NaN"), None);
        assert_eq!(parse_integer("abc"), None);
    }

    #[test]
    fn test_decimal_parsing_rounds_to_precision() {
        assert_eq!(parse_decimal("3.14159", 2), Some(3.14));
        assert_eq!(parse_decimal("1e3", 2), Some(1000.0));
        assert_eq!(parse_decimal("NaN", 2), None);
        assert_eq!(parse_decimal("inf", 2), None);
    }

    #[test]
    fn test_boolean_sets() {
        for v in ["true", "1", "yes", "Y", "t", "ON"] {
            assert_eq!(parse_boolean(v), Some(true), "value {}", v);
        }
        for v in ["false", "0", "no", "N", "f", "OFF"] {
            assert_eq!(parse_boolean(v), Some(false), "value {}", v);
        }
        assert_eq!(parse_boolean("maybe"), None);
    }

    #[test]
    fn test_timestamp_parsing_variants() {
        assert!(parse_timestamp("2025-07-14T02:30:00Z", "%Y-%m-%dT%H:%M:%S%.f").is_some());
        assert!(parse_timestamp("2025-07-14 02:30:00", "%Y-%m-%dT%H:%M:%S%.f").is_some());
        assert!(parse_timestamp("2025-07-14", "%Y-%m-%dT%H:%M:%S%.f").is_some());
        assert!(parse_timestamp("not a time", "%Y-%m-%dT%H:%M:%S%.f").is_none());
    }

    #[test]
    fn test_uuid_requires_canonical_form() {
        assert!(parse_uuid("550e8400-e29b-41d4-a716-446655440000").is_some());
        // Valid UUID but missing hyphens - rejected
        assert!(parse_uuid("550e8400e29b41d4a716446655440000").is_none());
        assert!(parse_uuid("zz0e8400-e29b-41d4-a716-446655440000").is_none());
    }

    #[test]
    fn test_value_transforms() {
        assert_eq!(ValueTransform::Uppercase.apply("abc1234"), "ABC1234");
        assert_eq!(ValueTransform::DigitsOnly.apply("(09) 123-4567"), "091234567");
    }

    #[test]
    fn test_json_coercion() {
        let transformations = vec![ColumnTransformation::new("meta", "meta", TargetType::Json)];
        let handler = ExtractHandler {
            extract_type: "test".to_string(),
            table_name: "raw.test".to_string(),
            columns: vec!["meta"],
            natural_keys: vec![],
            updated_at_column: None,
            transformations,
        };
        let config = AppConfig::defaults().transformation;
        let engine = TransformEngine::new(&handler, &config);

        let ok = engine.transform_row(
            &record(vec![Some(r#"{"a": 1}"#)]),
            &handler.transformations,
            1,
        );
        assert!(ok.is_success());

        let bad = engine.transform_row(&record(vec![Some("{broken")]), &handler.transformations, 1);
        assert!(!bad.is_success());
    }
}
