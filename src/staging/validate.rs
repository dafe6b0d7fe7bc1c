//! Rule-based row validation for the staging layer.
//!
//! Rules attach to column transformations and run after coercion. A rule's
//! predicate can read any column of the row, which is how cross-field checks
//! are expressed. Error-severity failures block the row; warnings are
//! recorded and let it through.

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::ValidationConfig;
use crate::errors::{EtlError, EtlResult};
use crate::types::{Severity, ValidationFailure};

use super::transform::{ColumnTransformation, TransformedRow, TypedValue};

lazy_static! {
    /// NHI: three letters then four digits (NZ National Health Index)
    static ref NHI_RE: Regex = Regex::new(r"^[A-Z]{3}\d{4}$").unwrap();
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
}

type CustomPredicate = Arc<dyn Fn(&TypedValue, &TransformedRow) -> bool + Send + Sync>;

/// The check a rule performs
#[derive(Clone)]
pub enum RuleCheck {
    Required,
    Pattern(Arc<Regex>),
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<String>),
    Length { min: Option<usize>, max: Option<usize> },
    Custom(CustomPredicate),
}

impl fmt::Debug for RuleCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleCheck::Required => write!(f, "Required"),
            RuleCheck::Pattern(re) => write!(f, "Pattern({})", re.as_str()),
            RuleCheck::Range { min, max } => write!(f, "Range({:?}, {:?})", min, max),
            RuleCheck::OneOf(values) => write!(f, "OneOf({:?})", values),
            RuleCheck::Length { min, max } => write!(f, "Length({:?}, {:?})", min, max),
            RuleCheck::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A named validation rule with a severity
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: String,
    pub check: RuleCheck,
    pub message: Option<String>,
    pub severity: Severity,
}

impl ValidationRule {
    fn new(name: &str, check: RuleCheck) -> Self {
        Self {
            name: name.to_string(),
            check,
            message: None,
            severity: Severity::Error,
        }
    }

    pub fn required() -> Self {
        Self::new("required", RuleCheck::Required)
    }

    /// Regex rule from a pattern string; fails fast on a bad pattern
    pub fn pattern(name: &str, pattern: &str) -> EtlResult<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| EtlError::Config(format!("invalid pattern for rule {}: {}", name, e)))?;
        Ok(Self::new(name, RuleCheck::Pattern(Arc::new(re))))
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self::new("range", RuleCheck::Range { min, max })
    }

    pub fn one_of(values: &[&str]) -> Self {
        Self::new(
            "enum",
            RuleCheck::OneOf(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn length(min: Option<usize>, max: Option<usize>) -> Self {
        Self::new("length", RuleCheck::Length { min, max })
    }

    pub fn custom<F>(name: &str, predicate: F) -> Self
    where
        F: Fn(&TypedValue, &TransformedRow) -> bool + Send + Sync + 'static,
    {
        Self::new(name, RuleCheck::Custom(Arc::new(predicate)))
    }

    /// NHI format: `^[A-Z]{3}\d{4}$`
    pub fn nhi_format() -> Self {
        Self::new("nhi_format", RuleCheck::Pattern(Arc::new(NHI_RE.clone())))
            .with_message("value is not a valid NHI")
    }

    pub fn email() -> Self {
        Self::new("email", RuleCheck::Pattern(Arc::new(EMAIL_RE.clone())))
            .with_message("value is not a valid email address")
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    /// Downgrade to warning severity (recorded, never blocks)
    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }

    /// Run this rule against one value in the context of its row.
    /// NULL values pass every rule except `Required` - nullability is the
    /// transformation layer's concern.
    fn passes(&self, value: &TypedValue, row: &TransformedRow) -> bool {
        match &self.check {
            RuleCheck::Required => !value.is_null(),
            RuleCheck::Pattern(re) => value.is_null() || re.is_match(&value.render()),
            RuleCheck::Range { min, max } => {
                if value.is_null() {
                    return true;
                }
                let numeric = match value {
                    TypedValue::Integer(i) => Some(*i as f64),
                    TypedValue::Decimal(d) => Some(*d),
                    TypedValue::Text(s) => s.parse::<f64>().ok(),
                    _ => None,
                };
                match numeric {
                    Some(n) => min.map_or(true, |m| n >= m) && max.map_or(true, |m| n <= m),
                    None => false,
                }
            }
            RuleCheck::OneOf(values) => value.is_null() || values.contains(&value.render()),
            RuleCheck::Length { min, max } => {
                if value.is_null() {
                    return true;
                }
                let len = value.render().chars().count();
                min.map_or(true, |m| len >= m) && max.map_or(true, |m| len <= m)
            }
            RuleCheck::Custom(predicate) => predicate(value, row),
        }
    }

    fn failure_for(&self, column: &str, value: &TypedValue) -> ValidationFailure {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("failed {} rule", self.name));
        ValidationFailure {
            column: column.to_string(),
            rule: self.name.clone(),
            actual: if value.is_null() {
                None
            } else {
                Some(value.render())
            },
            expected: None,
            message,
            severity: self.severity,
        }
    }
}

/// Outcome of validating one transformed row
#[derive(Debug, Default)]
pub struct RowValidation {
    pub failures: Vec<ValidationFailure>,
    pub warnings: Vec<ValidationFailure>,
}

impl RowValidation {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies per-column rule sets and enforces the error thresholds
pub struct ValidationEngine {
    config: ValidationConfig,
}

impl ValidationEngine {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enable_validation
    }

    /// Run every rule attached to every column of the row
    pub fn validate_row(
        &self,
        row: &TransformedRow,
        transformations: &[ColumnTransformation],
    ) -> RowValidation {
        let mut outcome = RowValidation::default();
        if !self.config.enable_validation {
            return outcome;
        }

        for t in transformations {
            let null = TypedValue::Null;
            let value = row.get(&t.target_column).unwrap_or(&null);
            for rule in &t.rules {
                if !rule.passes(value, row) {
                    let failure = rule.failure_for(&t.target_column, value);
                    match rule.severity {
                        Severity::Error => outcome.failures.push(failure),
                        Severity::Warning => outcome.warnings.push(failure),
                    }
                }
            }
        }
        outcome
    }

    /// Threshold check run between rows and between batches.
    /// Returns true when processing should stop.
    pub fn should_stop_validation(&self, batch_errors: usize, total_errors: usize) -> bool {
        batch_errors > self.config.max_errors_per_batch
            || total_errors > self.config.max_total_errors
    }
}
