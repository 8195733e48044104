use crate::constants::{ENTITY_MARKER, MIN_YEAR, PRODUCTION_MARKER, YEAR_MARKER};
use crate::error::SchemaError;
use crate::pipeline::table::{ColumnRoles, RawTable, Table, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::{debug, info, warn};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static PARENTHESIZED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(.*?\)").unwrap());
static UNDERSCORES: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Canonical column name: `"Maize Production (tonnes)"` becomes `"Maize_Production"`.
pub fn canonicalize_column_name(raw: &str) -> String {
    let folded = WHITESPACE.replace_all(raw.trim(), "_");
    let stripped = PARENTHESIZED.replace_all(&folded, "");
    let trimmed = stripped.trim_matches('_');
    UNDERSCORES.replace_all(trimmed, "_").into_owned()
}

pub fn is_production_column(name: &str) -> bool {
    name.to_lowercase().contains(PRODUCTION_MARKER)
}

/// A production cell that could not be read as a non-negative number.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionWarning {
    pub column: String,
    /// 1-based data row in the source file.
    pub row: usize,
    pub value: String,
}

impl fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "row {}: column {} value '{}' is not a non-negative number",
            self.row, self.column, self.value
        )
    }
}

/// Column names that override header inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleOverrides<'a> {
    pub entity: Option<&'a str>,
    pub year: Option<&'a str>,
}

#[derive(Debug)]
pub struct NormalizeOutcome {
    pub table: Table,
    pub loaded_rows: usize,
    pub invalid_year_rows: usize,
    pub warnings: Vec<CoercionWarning>,
}

pub struct Normalizer<'a> {
    overrides: RoleOverrides<'a>,
    current_year: i64,
}

impl<'a> Normalizer<'a> {
    pub fn new(overrides: RoleOverrides<'a>, current_year: i64) -> Self {
        Self {
            overrides,
            current_year,
        }
    }

    pub fn normalize(&self, raw: RawTable) -> Result<NormalizeOutcome, SchemaError> {
        let columns = canonicalize_headers(&raw.headers)?;
        info!(?columns, original = ?raw.headers, "canonicalized columns");

        let entity = resolve_role(&columns, "entity", ENTITY_MARKER, self.overrides.entity)?;
        let year = resolve_role(&columns, "year", YEAR_MARKER, self.overrides.year)?;
        if entity == year {
            return Err(SchemaError::Ambiguous {
                role: "year",
                candidates: vec![columns[year].clone()],
            });
        }
        let production: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|&(i, name)| i != entity && i != year && is_production_column(name))
            .map(|(i, _)| i)
            .collect();
        debug!(
            entity = %columns[entity],
            year = %columns[year],
            production = production.len(),
            "resolved column roles"
        );

        let roles = ColumnRoles {
            entity,
            year,
            production,
        };
        let is_metric: Vec<bool> = (0..columns.len())
            .map(|i| roles.production.contains(&i))
            .collect();

        let loaded_rows = raw.rows.len();
        let mut rows = Vec::with_capacity(loaded_rows);
        let mut warnings = Vec::new();
        let mut invalid_year_rows = 0;

        for (idx, cells) in raw.rows.into_iter().enumerate() {
            let year_value = match parse_year(&cells[year]) {
                Some(y) if (MIN_YEAR as i64..=self.current_year).contains(&y) => y,
                _ => {
                    invalid_year_rows += 1;
                    continue;
                }
            };

            let mut row = Vec::with_capacity(cells.len());
            for (i, cell) in cells.into_iter().enumerate() {
                let value = if i == year {
                    Value::Int(year_value)
                } else if is_metric[i] {
                    match parse_production(&cell) {
                        Ok(v) => Value::Num(v),
                        Err(()) => {
                            let warning = CoercionWarning {
                                column: columns[i].clone(),
                                row: idx + 1,
                                value: cell,
                            };
                            debug!(%warning, "coercion warning");
                            warnings.push(warning);
                            Value::Num(None)
                        }
                    }
                } else {
                    Value::Text(cell)
                };
                row.push(value);
            }
            rows.push(row);
        }

        if invalid_year_rows > 0 {
            info!(dropped = invalid_year_rows, "dropped rows with invalid years");
        }
        log_warning_summary(&warnings);

        Ok(NormalizeOutcome {
            table: Table {
                columns,
                roles,
                rows,
            },
            loaded_rows,
            invalid_year_rows,
            warnings,
        })
    }
}

fn canonicalize_headers(headers: &[String]) -> Result<Vec<String>, SchemaError> {
    let mut seen = HashSet::new();
    headers
        .iter()
        .map(|raw| {
            let name = canonicalize_column_name(raw);
            if name.is_empty() {
                return Err(SchemaError::EmptyColumn { raw: raw.clone() });
            }
            // SQLite identifiers are case-insensitive
            if !seen.insert(name.to_lowercase()) {
                return Err(SchemaError::DuplicateColumn(name));
            }
            Ok(name)
        })
        .collect()
}

/// Pick the column for a role: configuration first, then a unique substring match.
fn resolve_role(
    columns: &[String],
    role: &'static str,
    marker: &str,
    configured: Option<&str>,
) -> Result<usize, SchemaError> {
    if let Some(name) = configured {
        let canonical = canonicalize_column_name(name);
        return columns
            .iter()
            .position(|c| c == name || *c == canonical)
            .ok_or_else(|| SchemaError::UnknownConfigured {
                role,
                name: name.to_string(),
            });
    }

    let candidates: Vec<usize> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.to_lowercase().contains(marker))
        .map(|(i, _)| i)
        .collect();
    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(SchemaError::Missing { role }),
        many => Err(SchemaError::Ambiguous {
            role,
            candidates: many.iter().map(|&i| columns[i].clone()).collect(),
        }),
    }
}

fn parse_year(cell: &str) -> Option<i64> {
    let t = cell.trim();
    t.parse::<i64>().ok().or_else(|| {
        t.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// Empty cells are missing; anything else must be a finite, non-negative number.
fn parse_production(cell: &str) -> Result<Option<f64>, ()> {
    let t = cell.trim();
    if t.is_empty() {
        return Ok(None);
    }
    match t.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => Ok(Some(v + 0.0)),
        _ => Err(()),
    }
}

fn log_warning_summary(warnings: &[CoercionWarning]) {
    if warnings.is_empty() {
        return;
    }
    let mut per_column: BTreeMap<&str, usize> = BTreeMap::new();
    for w in warnings {
        *per_column.entry(w.column.as_str()).or_default() += 1;
    }
    for (column, count) in per_column {
        warn!(column, count, "unparsable production values treated as missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(headers: &[&str], rows: &[&[&str]]) -> RawTable {
        RawTable {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        }
    }

    fn normalizer() -> Normalizer<'static> {
        Normalizer::new(RoleOverrides::default(), 2025)
    }

    #[test]
    fn canonicalizes_unit_suffixes() {
        assert_eq!(canonicalize_column_name("Maize Production (tonnes)"), "Maize_Production");
        assert_eq!(canonicalize_column_name("  Entity "), "Entity");
        assert_eq!(
            canonicalize_column_name("Peas,  dry Production ( tonnes)"),
            "Peas,_dry_Production"
        );
        assert_eq!(canonicalize_column_name("(x) Sweet   potatoes"), "Sweet_potatoes");
        assert_eq!(canonicalize_column_name("a__b___c"), "a_b_c");
    }

    #[test]
    fn drops_future_and_unparsable_years() {
        let table = raw(
            &["Entity", "Year", "Wheat Production (tonnes)"],
            &[
                &["Testland", "2050", "1"],
                &["A", "1899", "1"],
                &["B", "abc", "1"],
                &["C", "2000.0", "1"],
                &["D", "1900", "1"],
            ],
        );
        let out = normalizer().normalize(table).unwrap();
        let years: Vec<i64> = out.table.rows.iter().map(|r| out.table.year(r)).collect();
        assert_eq!(years, vec![2000, 1900]);
        assert_eq!(out.invalid_year_rows, 3);
        assert_eq!(out.loaded_rows, 5);
    }

    #[test]
    fn bad_production_cells_become_missing_with_warning() {
        let table = raw(
            &["Entity", "Year", "Rice Production", "Code"],
            &[&["A", "2000", "n/a", "AAA"], &["B", "2000", "", "BBB"], &["C", "2000", "-5", "CCC"]],
        );
        let out = normalizer().normalize(table).unwrap();
        assert_eq!(out.table.roles.production, vec![2]);
        assert!(out.table.rows.iter().all(|r| r[2] == Value::Num(None)));
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.warnings[0].row, 1);
        assert_eq!(out.warnings[1].value, "-5");
        assert_eq!(out.table.rows[0][3], Value::Text("AAA".into()));
    }

    #[test]
    fn nan_text_is_not_a_number() {
        assert_eq!(parse_production("NaN"), Err(()));
        assert_eq!(parse_production("inf"), Err(()));
        assert_eq!(parse_production(" 12.5 "), Ok(Some(12.5)));
    }

    #[test]
    fn ambiguous_year_columns_fail_fast() {
        let table = raw(&["Entity", "Year", "Fiscal Year"], &[]);
        let err = normalizer().normalize(table).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Ambiguous {
                role: "year",
                candidates: vec!["Year".into(), "Fiscal_Year".into()],
            }
        );
    }

    #[test]
    fn missing_entity_column_fails_fast() {
        let table = raw(&["Country", "Year"], &[]);
        let err = normalizer().normalize(table).unwrap_err();
        assert_eq!(err, SchemaError::Missing { role: "entity" });
    }

    #[test]
    fn configured_roles_win_over_inference() {
        let table = raw(
            &["Country", "Year", "Fiscal Year", "Tea Production"],
            &[&["A", "2001", "1999", "4"]],
        );
        let overrides = RoleOverrides {
            entity: Some("Country"),
            year: Some("Year"),
        };
        let out = Normalizer::new(overrides, 2025).normalize(table).unwrap();
        assert_eq!(out.table.entity_column(), "Country");
        assert_eq!(out.table.year_column(), "Year");
        assert_eq!(out.table.year(&out.table.rows[0]), 2001);
    }

    #[test]
    fn configured_role_must_exist() {
        let table = raw(&["Entity", "Year"], &[]);
        let overrides = RoleOverrides {
            entity: Some("Region"),
            year: None,
        };
        let err = Normalizer::new(overrides, 2025).normalize(table).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownConfigured { role: "entity", .. }));
    }

    #[test]
    fn colliding_canonical_names_are_rejected() {
        let table = raw(&["Entity", "Year", "Rice Production", "Rice Production (t)"], &[]);
        let err = normalizer().normalize(table).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("Rice_Production".into()));
    }

    #[test]
    fn case_only_collisions_are_rejected() {
        let table = raw(&["Entity", "Year", "Rice Production", "RICE Production"], &[]);
        let err = normalizer().normalize(table).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateColumn("RICE_Production".into()));
    }
}
