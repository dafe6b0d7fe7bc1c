//! SQL construction and parameter-ceiling arithmetic.

mod common;

use health_etl::database::batch::{
    build_insert_sql, validate_batch_shape, PARAM_BUDGET, PG_PARAM_LIMIT,
};
use health_etl::database::rejections::should_stop_on_rejection_rate;
use health_etl::database::staging::build_upsert_sql;
use health_etl::database::{calculate_optimal_batch_size, max_rows_per_statement, RawQueryBuilder};

/// A 400-column batch requested at 200 rows caps to floor(60000/400) = 150
/// rows per statement and therefore needs two statements for 200 rows.
#[test]
fn test_wide_batch_splits_into_two_statements() {
    let columns = 400usize;
    let requested = 200usize;

    let capped = calculate_optimal_batch_size(columns, requested);
    assert_eq!(capped, 150);

    let rows: Vec<usize> = (0..requested).collect();
    let statements: Vec<&[usize]> = rows.chunks(capped).collect();
    assert_eq!(statements.len(), 2);
    assert_eq!(statements[0].len(), 150);
    assert_eq!(statements[1].len(), 50);

    // Each statement stays under the server's hard limit
    for statement in statements {
        assert!(statement.len() * columns <= PARAM_BUDGET);
        assert!(statement.len() * columns <= PG_PARAM_LIMIT);
    }
}

/// Placeholder count always equals rows x columns.
#[test]
fn test_placeholder_arithmetic() {
    for (cols, rows) in [(3, 1), (13, 7), (121, 495)] {
        let columns: Vec<String> = (0..cols).map(|i| format!("c{}", i)).collect();
        let sql = build_insert_sql("raw.t", &columns, rows);
        assert_eq!(sql.matches('$').count(), cols * rows);
        assert!(cols * rows <= PARAM_BUDGET);
    }
}

/// The shape validator refuses anything that would blow the budget.
#[test]
fn test_budget_enforced_before_building() {
    let max = max_rows_per_statement(13);
    let over: Vec<Vec<String>> = (0..max + 1)
        .map(|_| (0..12).map(|_| String::new()).collect())
        .collect();
    assert!(validate_batch_shape(13, 1, &over).is_err());

    let at: Vec<Vec<String>> = (0..max)
        .map(|_| (0..12).map(|_| String::new()).collect())
        .collect();
    assert!(validate_batch_shape(13, 1, &at).is_ok());
}

/// Upsert statement: conflict on the natural key, every other column
/// updates from EXCLUDED.
#[test]
fn test_upsert_statement_shape() {
    let columns: Vec<String> = [
        "load_run_file_id",
        "load_ts",
        "patient_id",
        "practice_id",
        "organisation_id",
        "nhi_number",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let conflict: Vec<String> = ["patient_id", "practice_id", "organisation_id"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let sql = build_upsert_sql("stg.patients", &columns, &conflict, 3);

    assert!(sql.contains("ON CONFLICT (patient_id, practice_id, organisation_id) DO UPDATE SET"));
    assert!(sql.contains("nhi_number = EXCLUDED.nhi_number"));
    assert!(sql.contains("load_ts = EXCLUDED.load_ts"));
    assert!(!sql.contains("organisation_id = EXCLUDED.organisation_id"));
    assert_eq!(sql.matches('$').count(), 3 * columns.len());
}

/// Raw query parameters are numbered deterministically: ids, limit, offset.
#[test]
fn test_raw_query_parameter_order() {
    let builder = RawQueryBuilder::new(
        "raw.appointments",
        &["appointment_id".to_string(), "status".to_string()],
    );

    let sql = builder.select_page_sql(4, None, None).unwrap();
    assert!(sql.contains("IN ($1, $2, $3, $4)"));
    assert!(sql.ends_with("LIMIT $5 OFFSET $6"));

    let declare = builder.declare_cursor_sql("scan", 2).unwrap();
    assert!(declare.contains("IN ($1, $2)"));
    assert!(declare.contains("ORDER BY raw_id"));
}

#[test]
fn test_rejection_rate_stop() {
    assert!(!should_stop_on_rejection_rate(1_000, 50, 5.0));
    assert!(should_stop_on_rejection_rate(1_000, 51, 5.0));
    assert!(!should_stop_on_rejection_rate(0, 0, 5.0));
}
