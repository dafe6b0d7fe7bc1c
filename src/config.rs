use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::env;

/// Application configuration loaded from config.toml or environment variables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub processing: ProcessingConfig,
    pub csv: CsvConfig,
    pub error_handling: ErrorHandlingConfig,
    pub validation: ValidationConfig,
    pub transformation: TransformationConfig,
}

/// Connection pool settings for the warehouse database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_ms: u64,
    pub retry_attempts: usize,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    pub batch_size: usize,
    pub max_concurrent_files: usize,
    pub max_queue_size: usize,
    pub max_memory_mb: usize,
    pub buffer_size_mb: usize,
    pub continue_on_error: bool,
    pub force_reprocess: bool,
}

/// Delimited extract format settings.
///
/// Vendor extracts are headerless with multi-character field and row
/// separators. `has_headers` exists for completeness but defaults to false
/// and is expected to stay false for production extracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConfig {
    pub field_separator: String,
    pub row_separator: String,
    pub max_row_length: usize,
    pub max_field_length: usize,
    pub has_headers: bool,
    pub skip_empty_rows: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandlingConfig {
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    pub continue_on_error: bool,
    pub error_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub enable_validation: bool,
    pub fail_on_validation_error: bool,
    pub max_errors_per_batch: usize,
    pub max_total_errors: usize,
    pub reject_invalid_rows: bool,
    pub track_rejection_reasons: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub enable_type_coercion: bool,
    pub date_format: String,
    pub timestamp_format: String,
    pub decimal_precision: u32,
    pub trim_strings: bool,
    pub nullify_empty_strings: bool,
}

impl AppConfig {
    /// Load configuration from config.toml file and environment variables.
    /// Environment variables (HETL_ prefix) take precedence over file values.
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Database
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.timeout_ms", 30_000)?
            .set_default("database.retry_attempts", 3)?
            .set_default("database.retry_delay_ms", 1_000)?
            // Processing
            .set_default("processing.batch_size", 1_000)?
            .set_default("processing.max_concurrent_files", 5)?
            .set_default("processing.max_queue_size", 5)?
            .set_default("processing.max_memory_mb", 1_024)?
            .set_default("processing.buffer_size_mb", 8)?
            .set_default("processing.continue_on_error", true)?
            .set_default("processing.force_reprocess", false)?
            // Delimited format
            .set_default("csv.field_separator", "|^^|")?
            .set_default("csv.row_separator", "|~~|")?
            .set_default("csv.max_row_length", 10_000_000)?
            .set_default("csv.max_field_length", 5_000)?
            .set_default("csv.has_headers", false)?
            .set_default("csv.skip_empty_rows", true)?
            // Error handling
            .set_default("error_handling.max_retries", 3)?
            .set_default("error_handling.retry_delay_ms", 1_000)?
            .set_default("error_handling.continue_on_error", true)?
            .set_default("error_handling.error_threshold", 100)?
            // Validation
            .set_default("validation.enable_validation", true)?
            .set_default("validation.fail_on_validation_error", false)?
            .set_default("validation.max_errors_per_batch", 100)?
            .set_default("validation.max_total_errors", 1_000)?
            .set_default("validation.reject_invalid_rows", true)?
            .set_default("validation.track_rejection_reasons", true)?
            // Transformation
            .set_default("transformation.enable_type_coercion", true)?
            .set_default("transformation.date_format", "%Y-%m-%d")?
            .set_default("transformation.timestamp_format", "%Y-%m-%dT%H:%M:%S%.f")?
            .set_default("transformation.decimal_precision", 4)?
            .set_default("transformation.trim_strings", true)?
            .set_default("transformation.nullify_empty_strings", true)?
            // Load from config.toml if it exists
            .add_source(File::with_name("config").required(false))
            // Override with environment variables, e.g. HETL_DATABASE__URL
            .add_source(config::Environment::with_prefix("HETL").separator("__"))
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize()?;

        // DATABASE_URL is the conventional override used by deployment tooling
        if let Ok(url) = env::var("DATABASE_URL") {
            app_config.database.url = url;
        }

        app_config.validate().map_err(ConfigError::Message)?;
        Ok(app_config)
    }

    /// Sensible defaults without requiring a config file (tests, status commands)
    pub fn defaults() -> Self {
        Self {
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 10,
                timeout_ms: 30_000,
                retry_attempts: 3,
                retry_delay_ms: 1_000,
            },
            processing: ProcessingConfig {
                batch_size: 1_000,
                max_concurrent_files: 5,
                max_queue_size: 5,
                max_memory_mb: 1_024,
                buffer_size_mb: 8,
                continue_on_error: true,
                force_reprocess: false,
            },
            csv: CsvConfig {
                field_separator: "|^^|".to_string(),
                row_separator: "|~~|".to_string(),
                max_row_length: 10_000_000,
                max_field_length: 5_000,
                has_headers: false,
                skip_empty_rows: true,
            },
            error_handling: ErrorHandlingConfig {
                max_retries: 3,
                retry_delay_ms: 1_000,
                continue_on_error: true,
                error_threshold: 100,
            },
            validation: ValidationConfig {
                enable_validation: true,
                fail_on_validation_error: false,
                max_errors_per_batch: 100,
                max_total_errors: 1_000,
                reject_invalid_rows: true,
                track_rejection_reasons: true,
            },
            transformation: TransformationConfig {
                enable_type_coercion: true,
                date_format: "%Y-%m-%d".to_string(),
                timestamp_format: "%Y-%m-%dT%H:%M:%S%.f".to_string(),
                decimal_precision: 4,
                trim_strings: true,
                nullify_empty_strings: true,
            },
        }
    }

    /// Sanity checks that would otherwise surface as confusing runtime errors
    fn validate(&self) -> Result<(), String> {
        if self.processing.batch_size == 0 {
            return Err("processing.batch_size must be greater than zero".to_string());
        }
        if self.processing.max_queue_size == 0 {
            return Err("processing.max_queue_size must be greater than zero".to_string());
        }
        if self.processing.max_concurrent_files == 0 {
            return Err("processing.max_concurrent_files must be greater than zero".to_string());
        }
        if self.csv.field_separator.is_empty() || self.csv.row_separator.is_empty() {
            return Err("csv separators must not be empty".to_string());
        }
        if self.csv.field_separator == self.csv.row_separator {
            return Err("csv.field_separator and csv.row_separator must differ".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be greater than zero".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.csv.field_separator, "|^^|");
        assert_eq!(config.csv.row_separator, "|~~|");
        assert_eq!(config.processing.max_queue_size, 5);
        assert_eq!(config.processing.max_concurrent_files, 5);
        assert!(!config.csv.has_headers);
    }

    #[test]
    fn test_identical_separators_rejected() {
        let mut config = AppConfig::defaults();
        config.csv.row_separator = config.csv.field_separator.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = AppConfig::defaults();
        config.processing.batch_size = 0;
        assert!(config.validate().is_err());
    }
}
