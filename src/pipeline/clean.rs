use crate::pipeline::table::{round0, Table, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

/// Winsorization bounds applied to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBounds {
    pub column: String,
    pub floor: f64,
    pub ceiling: f64,
}

#[derive(Debug)]
pub struct CleanOutcome {
    pub table: Table,
    pub duplicates_removed: usize,
    /// Columns without any value are absent.
    pub bounds: Vec<ColumnBounds>,
}

/// Deduplicates, caps outliers and rounds production columns, in that order.
pub struct Cleaner {
    lower: f64,
    upper: f64,
}

impl Cleaner {
    pub fn new(lower_percentile: f64, upper_percentile: f64) -> Self {
        Self {
            lower: lower_percentile,
            upper: upper_percentile,
        }
    }

    #[instrument(level = "info", skip_all, fields(rows = table.len()))]
    pub fn clean(&self, table: Table) -> CleanOutcome {
        let (mut table, duplicates_removed) = remove_duplicates(table);
        info!(duplicates_removed, "removed exact duplicates");

        let bounds = self.cap_outliers(&mut table);
        round_production(&mut table);
        debug!("rounded production values to whole numbers");

        CleanOutcome {
            table,
            duplicates_removed,
            bounds,
        }
    }

    fn cap_outliers(&self, table: &mut Table) -> Vec<ColumnBounds> {
        let mut all_bounds = Vec::new();
        for &col in &table.roles.production {
            let mut values = table.column_values(col);
            if values.is_empty() {
                continue;
            }
            values.sort_by(f64::total_cmp);
            let floor = quantile_sorted(&values, self.lower);
            let ceiling = quantile_sorted(&values, self.upper);

            let mut capped = 0usize;
            for row in &mut table.rows {
                if let Value::Num(Some(v)) = &mut row[col] {
                    let clamped = v.clamp(floor, ceiling);
                    if clamped != *v {
                        capped += 1;
                        *v = clamped;
                    }
                }
            }
            let column = table.columns[col].clone();
            info!(%column, floor, ceiling, capped, "capped outliers");
            all_bounds.push(ColumnBounds {
                column,
                floor,
                ceiling,
            });
        }
        all_bounds
    }
}

/// Keep the first occurrence of every exact duplicate row. Returns the number removed.
pub fn remove_duplicates(mut table: Table) -> (Table, usize) {
    let before = table.rows.len();
    let mut seen = HashSet::with_capacity(before);
    table.rows.retain(|row| {
        let mut key = String::new();
        for v in row {
            v.dedup_key(&mut key);
        }
        seen.insert(key)
    });
    let removed = before - table.rows.len();
    (table, removed)
}

fn round_production(table: &mut Table) {
    let cols = table.roles.production.clone();
    for row in &mut table.rows {
        for &col in &cols {
            if let Value::Num(Some(v)) = &mut row[col] {
                *v = round0(*v);
            }
        }
    }
}

/// Quantile of ascending `sorted` values with linear interpolation between closest ranks.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::table::ColumnRoles;

    fn table(rows: Vec<(&str, i64, Option<f64>)>) -> Table {
        Table {
            columns: vec!["Entity".into(), "Year".into(), "Wheat_Production".into()],
            roles: ColumnRoles {
                entity: 0,
                year: 1,
                production: vec![2],
            },
            rows: rows
                .into_iter()
                .map(|(e, y, v)| vec![Value::Text(e.into()), Value::Int(y), Value::Num(v)])
                .collect(),
        }
    }

    #[test]
    fn identical_rows_collapse_to_one() {
        let t = table(vec![("X", 2000, Some(100.0)), ("X", 2000, Some(100.0))]);
        let out = Cleaner::new(0.01, 0.99).clean(t);
        assert_eq!(out.table.len(), 1);
        assert_eq!(out.duplicates_removed, 1);
    }

    #[test]
    fn rows_with_missing_values_are_still_duplicates() {
        let t = table(vec![("X", 2000, None), ("X", 2000, None), ("X", 2000, Some(0.0))]);
        let (t, removed) = remove_duplicates(t);
        assert_eq!(removed, 1);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn deduplication_is_idempotent() {
        let t = table(vec![
            ("X", 2000, Some(1.0)),
            ("X", 2000, Some(1.0)),
            ("Y", 2000, Some(1.0)),
            ("Y", 2001, Some(1.0)),
        ]);
        let (once, _) = remove_duplicates(t);
        let len = once.len();
        let (twice, removed) = remove_duplicates(once);
        assert_eq!(twice.len(), len);
        assert_eq!(removed, 0);
    }

    #[test]
    fn outlier_is_clamped_not_removed() {
        let mut rows: Vec<(&str, i64, Option<f64>)> =
            (1..=100).map(|i| ("E", 1900 + i as i64, Some(i as f64))).collect();
        rows.push(("Big", 2020, Some(100_000.0)));
        let out = Cleaner::new(0.01, 0.99).clean(table(rows));

        assert_eq!(out.table.len(), 101);
        let values = out.table.column_values(2);
        let bounds = &out.bounds[0];
        assert_eq!(bounds.ceiling, 100.0);
        assert_eq!(bounds.floor, 2.0);
        assert_eq!(*values.last().unwrap(), 100.0);
        assert!(values.iter().all(|v| (bounds.floor..=bounds.ceiling).contains(v)));
    }

    #[test]
    fn values_on_the_bounds_are_retained() {
        let out = Cleaner::new(0.0, 1.0).clean(table(vec![
            ("A", 2000, Some(5.0)),
            ("B", 2000, Some(7.0)),
            ("C", 2000, None),
        ]));
        assert_eq!(out.table.len(), 3);
        assert_eq!(out.table.column_values(2), vec![5.0, 7.0]);
        assert_eq!(out.table.rows[2][2], Value::Num(None));
    }

    #[test]
    fn capping_happens_before_rounding() {
        let out = Cleaner::new(0.0, 0.5).clean(table(vec![
            ("A", 2000, Some(1.0)),
            ("B", 2000, Some(2.4)),
            ("C", 2000, Some(9.0)),
        ]));
        // ceiling 2.4 rounds to 2
        assert_eq!(out.table.column_values(2), vec![1.0, 2.0, 2.0]);
    }

    #[test]
    fn empty_columns_are_skipped() {
        let out = Cleaner::new(0.01, 0.99).clean(table(vec![("A", 2000, None)]));
        assert!(out.bounds.is_empty());
    }

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.5), 2.5);
        assert_eq!(quantile_sorted(&v, 0.0), 1.0);
        assert_eq!(quantile_sorted(&v, 1.0), 4.0);
        assert_eq!(quantile_sorted(&[7.0], 0.99), 7.0);
    }
}
