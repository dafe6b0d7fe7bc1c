//! Built-in extract definitions.
//!
//! Column lists mirror the vendor's extract layout and are positional: the
//! Nth field of a delimited row lands in the Nth column here. Transformations
//! then decide how each column lands in staging.

use crate::staging::transform::{ColumnTransformation, TargetType, ValueTransform};
use crate::staging::validate::ValidationRule;

use super::ExtractHandler;

pub fn all() -> Vec<ExtractHandler> {
    vec![patients(), appointments(), providers(), practices()]
}

fn patients() -> ExtractHandler {
    ExtractHandler {
        extract_type: "patients".to_string(),
        table_name: "raw.patients".to_string(),
        columns: vec![
            "patient_id",
            "nhi_number",
            "first_name",
            "family_name",
            "dob",
            "gender",
            "email",
            "phone",
            "practice_id",
            "organisation_id",
            "is_active",
            "updated_at",
        ],
        natural_keys: vec![
            "patient_id".to_string(),
            "practice_id".to_string(),
            "organisation_id".to_string(),
        ],
        updated_at_column: Some("updated_at".to_string()),
        transformations: vec![
            ColumnTransformation::new("patient_id", "patient_id", TargetType::Text).required(),
            ColumnTransformation::new("nhi_number", "nhi_number", TargetType::Text)
                .with_transform(ValueTransform::Uppercase)
                .with_rule(ValidationRule::nhi_format()),
            ColumnTransformation::new("first_name", "first_name", TargetType::Text),
            ColumnTransformation::new("family_name", "family_name", TargetType::Text),
            ColumnTransformation::new("dob", "date_of_birth", TargetType::Date),
            ColumnTransformation::new("gender", "gender", TargetType::Text)
                .with_transform(ValueTransform::Lowercase)
                .with_rule(
                    ValidationRule::one_of(&["male", "female", "other", "unknown"]).warning(),
                ),
            ColumnTransformation::new("email", "email", TargetType::Text)
                .with_rule(ValidationRule::email().warning()),
            ColumnTransformation::new("phone", "phone", TargetType::Text)
                .with_transform(ValueTransform::DigitsOnly),
            ColumnTransformation::new("practice_id", "practice_id", TargetType::Text).required(),
            ColumnTransformation::new("organisation_id", "organisation_id", TargetType::Text)
                .required(),
            ColumnTransformation::new("is_active", "is_active", TargetType::Boolean)
                .with_default("true"),
            ColumnTransformation::new("updated_at", "updated_at", TargetType::Timestamp),
        ],
    }
}

fn appointments() -> ExtractHandler {
    ExtractHandler {
        extract_type: "appointments".to_string(),
        table_name: "raw.appointments".to_string(),
        columns: vec![
            "appointment_id",
            "patient_id",
            "provider_id",
            "practice_id",
            "organisation_id",
            "schedule_date",
            "start_time",
            "duration_minutes",
            "status",
            "notes",
            "updated_at",
        ],
        natural_keys: vec![
            "appointment_id".to_string(),
            "practice_id".to_string(),
            "organisation_id".to_string(),
        ],
        updated_at_column: Some("updated_at".to_string()),
        transformations: vec![
            ColumnTransformation::new("appointment_id", "appointment_id", TargetType::Text)
                .required(),
            ColumnTransformation::new("patient_id", "patient_id", TargetType::Text).required(),
            ColumnTransformation::new("provider_id", "provider_id", TargetType::Text),
            ColumnTransformation::new("practice_id", "practice_id", TargetType::Text).required(),
            ColumnTransformation::new("organisation_id", "organisation_id", TargetType::Text)
                .required(),
            ColumnTransformation::new("schedule_date", "schedule_date", TargetType::Date)
                .required(),
            ColumnTransformation::new("start_time", "start_time", TargetType::Timestamp),
            ColumnTransformation::new("duration_minutes", "duration_minutes", TargetType::Integer)
                .with_rule(ValidationRule::range(Some(0.0), Some(1_440.0))),
            ColumnTransformation::new("status", "status", TargetType::Text)
                .with_transform(ValueTransform::Lowercase)
                .with_rule(ValidationRule::one_of(&[
                    "booked",
                    "arrived",
                    "completed",
                    "cancelled",
                    "did_not_attend",
                ])),
            ColumnTransformation::new("notes", "notes", TargetType::Text),
            ColumnTransformation::new("updated_at", "updated_at", TargetType::Timestamp),
        ],
    }
}

fn providers() -> ExtractHandler {
    ExtractHandler {
        extract_type: "providers".to_string(),
        table_name: "raw.providers".to_string(),
        columns: vec![
            "provider_id",
            "provider_code",
            "full_name",
            "provider_type",
            "practice_id",
            "organisation_id",
            "is_active",
            "updated_at",
        ],
        natural_keys: vec![
            "provider_id".to_string(),
            "practice_id".to_string(),
            "organisation_id".to_string(),
        ],
        updated_at_column: Some("updated_at".to_string()),
        transformations: vec![
            ColumnTransformation::new("provider_id", "provider_id", TargetType::Text).required(),
            ColumnTransformation::new("provider_code", "provider_code", TargetType::Text)
                .with_transform(ValueTransform::Uppercase),
            ColumnTransformation::new("full_name", "full_name", TargetType::Text).required(),
            ColumnTransformation::new("provider_type", "provider_type", TargetType::Text),
            ColumnTransformation::new("practice_id", "practice_id", TargetType::Text).required(),
            ColumnTransformation::new("organisation_id", "organisation_id", TargetType::Text)
                .required(),
            ColumnTransformation::new("is_active", "is_active", TargetType::Boolean)
                .with_default("true"),
            ColumnTransformation::new("updated_at", "updated_at", TargetType::Timestamp),
        ],
    }
}

fn practices() -> ExtractHandler {
    ExtractHandler {
        extract_type: "practices".to_string(),
        table_name: "raw.practices".to_string(),
        columns: vec![
            "practice_id",
            "practice_name",
            "organisation_id",
            "address",
            "suburb",
            "city",
            "postcode",
            "updated_at",
        ],
        natural_keys: vec!["practice_id".to_string(), "organisation_id".to_string()],
        updated_at_column: Some("updated_at".to_string()),
        transformations: vec![
            ColumnTransformation::new("practice_id", "practice_id", TargetType::Text).required(),
            ColumnTransformation::new("practice_name", "practice_name", TargetType::Text)
                .required(),
            ColumnTransformation::new("organisation_id", "organisation_id", TargetType::Text)
                .required(),
            ColumnTransformation::new("address", "address", TargetType::Text),
            ColumnTransformation::new("suburb", "suburb", TargetType::Text),
            ColumnTransformation::new("city", "city", TargetType::Text),
            ColumnTransformation::new("postcode", "postcode", TargetType::Text)
                .with_rule(ValidationRule::length(Some(4), Some(4)).warning()),
            ColumnTransformation::new("updated_at", "updated_at", TargetType::Timestamp),
        ],
    }
}
