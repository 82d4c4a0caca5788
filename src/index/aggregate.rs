//! Helpers for writing reduce functions over map rows.

use crate::core::types::{Fields, Value};

/// Sum of the numeric values of `field`. Non-numeric and absent values count as zero.
pub fn sum(rows: &[Fields], field: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(field).and_then(Value::as_f64))
        .sum()
}

/// Number of rows satisfying `predicate`.
pub fn count_where(rows: &[Fields], predicate: impl Fn(&Fields) -> bool) -> usize {
    rows.iter().filter(|row| predicate(row)).count()
}

/// First present, non-null value of `field`, or `Value::Null`.
pub fn first_non_null(rows: &[Fields], field: &str) -> Value {
    rows.iter()
        .filter_map(|row| row.get(field))
        .find(|value| !value.is_null())
        .cloned()
        .unwrap_or(Value::Null)
}

/// `total / count`, or zero when nothing was counted.
pub fn average(total: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}
