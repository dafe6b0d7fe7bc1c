//! Intra-batch deduplication by natural key.
//!
//! Rows sharing a key tuple collapse to the one with the newest update
//! timestamp; equal timestamps (and rows with no parseable timestamp) keep
//! the earliest-seen row. Key tuples join components with a NUL byte and
//! use a distinct NUL-delimited sentinel for NULLs, so `("a", NULL)` can
//! never collide with `("a", "NULL")`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::transform::TransformedRow;

/// Sentinel for NULL key components; NUL-delimited so no rendered value
/// can produce it
const NULL_SENTINEL: &str = "\u{0}NULL\u{0}";

/// Key separator; cleaned field values can never contain a NUL byte
const KEY_SEPARATOR: char = '\u{0}';

/// Natural-key tuple for one row
pub fn natural_key(row: &TransformedRow, keys: &[String]) -> String {
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        match row.get(key) {
            Some(value) if !value.is_null() => parts.push(value.render()),
            _ => parts.push(NULL_SENTINEL.to_string()),
        }
    }
    parts.join(&KEY_SEPARATOR.to_string())
}

#[derive(Debug)]
pub struct DedupOutcome {
    /// Survivors in first-seen key order
    pub survivors: Vec<TransformedRow>,
    /// Rows collapsed away
    pub duplicates: u64,
}

/// Deduplicate one batch. Deterministic: the survivor for a key is the row
/// with the maximum `updated_at`, ties broken by lowest original index.
pub fn dedupe_batch(
    rows: Vec<TransformedRow>,
    natural_keys: &[String],
    updated_at_column: Option<&str>,
) -> DedupOutcome {
    if natural_keys.is_empty() || rows.len() < 2 {
        return DedupOutcome {
            duplicates: 0,
            survivors: rows,
        };
    }

    let total = rows.len();
    let mut survivors: Vec<TransformedRow> = Vec::with_capacity(total);
    // Key -> (survivor position, survivor timestamp)
    let mut index: HashMap<String, (usize, Option<DateTime<Utc>>)> = HashMap::new();

    for row in rows {
        let key = natural_key(&row, natural_keys);
        let ts = updated_at_column
            .and_then(|col| row.get(col))
            .and_then(|v| v.as_timestamp());

        match index.get_mut(&key) {
            None => {
                index.insert(key, (survivors.len(), ts));
                survivors.push(row);
            }
            Some((pos, best_ts)) => {
                // Strictly newer wins; None sorts before any timestamp
                if ts > *best_ts {
                    survivors[*pos] = row;
                    *best_ts = ts;
                }
            }
        }
    }

    DedupOutcome {
        duplicates: (total - survivors.len()) as u64,
        survivors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::transform::TypedValue;
    use chrono::NaiveDateTime;
    use std::sync::Arc;

    fn row(id: i64, patient: &str, practice: Option<&str>, ts: Option<&str>) -> TransformedRow {
        let updated = ts.map(|t| {
            NaiveDateTime::parse_from_str(t, "%Y-%m-%d %H:%M:%S")
                .unwrap()
                .and_utc()
        });
        TransformedRow {
            raw_id: id,
            lineage_fk: 1,
            row_number: id,
            columns: Arc::new(vec![
                "patient_id".to_string(),
                "practice_id".to_string(),
                "updated_at".to_string(),
            ]),
            values: vec![
                TypedValue::Text(patient.to_string()),
                practice
                    .map(|p| TypedValue::Text(p.to_string()))
                    .unwrap_or(TypedValue::Null),
                updated.map(TypedValue::Timestamp).unwrap_or(TypedValue::Null),
            ],
        }
    }

    fn keys() -> Vec<String> {
        vec!["patient_id".to_string(), "practice_id".to_string()]
    }

    #[test]
    fn test_newest_updated_at_survives() {
        let rows = vec![
            row(1, "p1", Some("practice1"), Some("2025-07-01 00:00:00")),
            row(2, "p1", Some("practice1"), Some("2025-07-03 00:00:00")),
            row(3, "p1", Some("practice1"), Some("2025-07-02 00:00:00")),
        ];
        let outcome = dedupe_batch(rows, &keys(), Some("updated_at"));

        assert_eq!(outcome.duplicates, 2);
        assert_eq!(outcome.survivors.len(), 1);
        assert_eq!(outcome.survivors[0].raw_id, 2);
    }

    #[test]
    fn test_tie_keeps_lowest_original_index() {
        let rows = vec![
            row(10, "p1", Some("practice1"), Some("2025-07-01 00:00:00")),
            row(11, "p1", Some("practice1"), Some("2025-07-01 00:00:00")),
        ];
        let outcome = dedupe_batch(rows, &keys(), Some("updated_at"));
        assert_eq!(outcome.survivors[0].raw_id, 10);
    }

    #[test]
    fn test_missing_timestamp_loses_to_any_timestamp() {
        let rows = vec![
            row(1, "p1", Some("practice1"), None),
            row(2, "p1", Some("practice1"), Some("2020-01-01 00:00:00")),
        ];
        let outcome = dedupe_batch(rows, &keys(), Some("updated_at"));
        assert_eq!(outcome.survivors[0].raw_id, 2);
    }

    #[test]
    fn test_null_key_component_distinct_from_literal() {
        let rows = vec![
            row(1, "p1", None, Some("2025-07-01 00:00:00")),
            row(2, "p1", Some("NULL"), Some("2025-07-02 00:00:00")),
        ];
        // A NULL component and the literal string "NULL" are different keys
        let outcome = dedupe_batch(rows, &keys(), Some("updated_at"));
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.survivors.len(), 2);
    }

    #[test]
    fn test_survivor_order_is_first_seen() {
        let rows = vec![
            row(1, "a", Some("x"), None),
            row(2, "b", Some("x"), None),
            row(3, "a", Some("x"), Some("2025-07-01 00:00:00")),
        ];
        let outcome = dedupe_batch(rows, &keys(), Some("updated_at"));
        assert_eq!(outcome.survivors.len(), 2);
        // "a" keeps its first-seen position even though row 3 replaced row 1
        assert_eq!(outcome.survivors[0].raw_id, 3);
        assert_eq!(outcome.survivors[1].raw_id, 2);
    }

    #[test]
    fn test_repeat_run_is_deterministic() {
        let make = || {
            vec![
                row(1, "p1", Some("q"), Some("2025-07-01 00:00:00")),
                row(2, "p1", Some("q"), Some("2025-07-03 00:00:00")),
                row(3, "p2", Some("q"), Some("2025-07-02 00:00:00")),
                row(4, "p1", Some("q"), Some("2025-07-03 00:00:00")),
            ]
        };
        let first = dedupe_batch(make(), &keys(), Some("updated_at"));
        let second = dedupe_batch(make(), &keys(), Some("updated_at"));
        let ids =
            |o: &DedupOutcome| o.survivors.iter().map(|r| r.raw_id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        // 2 and 4 tie on timestamp; 2 came first
        assert_eq!(ids(&first), vec![2, 3]);
    }

    #[test]
    fn test_no_natural_keys_keeps_everything() {
        let rows = vec![
            row(1, "p1", Some("q"), None),
            row(2, "p1", Some("q"), None),
        ];
        let outcome = dedupe_batch(rows, &[], Some("updated_at"));
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(outcome.survivors.len(), 2);
    }
}
