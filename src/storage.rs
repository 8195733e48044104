use crate::allowlist::{Metric, MetricAllowlist};
use crate::constants::{
    display_name, DATASET_META_TABLE, DECADE_COLUMN, DECADE_TABLE, PROCESSED_TABLE,
    PRODUCTION_COLUMNS_TABLE, STATS_TABLE, TOP_PRODUCERS_TABLE, YEARLY_TABLE,
};
use crate::db::quote_ident;
use crate::error::{PipelineError, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

pub type JsonRow = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecadePoint {
    pub decade: i64,
    pub production: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    #[serde(rename = "Year")]
    pub year: i64,
    pub production: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistributionPoint {
    #[serde(rename = "Entity")]
    pub entity: String,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopProducerRow {
    pub region: String,
    pub production_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductStats {
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
}

impl ProductStats {
    /// `None` when there are no values. `std` is the sample deviation.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std = (values.len() > 1).then(|| {
            (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        });
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            mean,
            std,
            min,
            max,
            lower_bound: std.map(|s| mean - s),
            upper_bound: std.map(|s| mean + s),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropShare {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BubbleRecord {
    pub country: String,
    pub total_production: f64,
    pub top_crops: Vec<CropShare>,
}

impl BubbleRecord {
    /// Total over all crops plus the three largest non-zero ones; `None` for a zero total.
    pub fn from_totals(country: String, totals: &[(String, Option<f64>)]) -> Option<Self> {
        let total_production: f64 = totals.iter().filter_map(|(_, v)| *v).sum();
        if total_production == 0.0 {
            return None;
        }
        let mut crops: Vec<CropShare> = totals
            .iter()
            .map(|(name, v)| CropShare {
                name: display_name(name).to_string(),
                value: v.unwrap_or(0.0),
            })
            .collect();
        crops.sort_by(|a, b| b.value.total_cmp(&a.value));
        crops.truncate(3);
        crops.retain(|c| c.value > 0.0);
        Some(Self {
            country,
            total_production,
            top_crops: crops,
        })
    }
}

/// Read-side access to the served tables.
pub trait Storage: Send + Sync {
    fn allowlist(&self) -> &MetricAllowlist;

    fn all_rows(&self) -> Result<Vec<JsonRow>>;
    /// Metrics of one (entity, year) row, without the entity and year keys.
    fn row_for(&self, entity: &str, year: i64) -> Result<Option<JsonRow>>;
    fn yearly(&self) -> Result<Vec<JsonRow>>;
    fn decade_series(&self, metric: &Metric) -> Result<Vec<DecadePoint>>;
    fn scatter(&self, x: &Metric, y: &Metric) -> Result<Vec<JsonRow>>;
    /// `{statistic: {metric: value}}`.
    fn summary(&self) -> Result<JsonRow>;
    fn product_stats(&self, metric: &Metric) -> Result<Option<ProductStats>>;
    fn entities(&self) -> Result<Vec<String>>;
    fn years(&self) -> Result<Vec<i64>>;
    fn trend(&self, entity: &str, metric: &Metric) -> Result<Vec<TrendPoint>>;
    /// Every row of one entity by ascending year, without the entity key.
    fn country_trends(&self, entity: &str) -> Result<Vec<JsonRow>>;
    fn distribution(&self, year: i64, metric: &Metric) -> Result<Vec<DistributionPoint>>;
    fn stacked(&self, year: i64, metrics: &[Metric]) -> Result<Vec<JsonRow>>;
    fn bubble(&self) -> Result<Vec<BubbleRecord>>;
    fn top_producers(&self, crop_type: &str, limit: i64) -> Result<Vec<TopProducerRow>>;
    fn crop_types(&self) -> Result<Vec<String>>;
}

/// [`Storage`] over the tables written by [`crate::db::Database::load_artifacts`].
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    allowlist: MetricAllowlist,
    entity_col: String,
    year_col: String,
}

impl SqliteStorage {
    /// Take ownership of a loaded connection and read the dataset metadata.
    pub fn new(conn: Connection) -> Result<Self> {
        let meta = |key: &str| -> Result<String> {
            conn.query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", quote_ident(DATASET_META_TABLE)),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .ok_or_else(|| PipelineError::Config(format!("dataset metadata '{key}' missing; run `load` first")))
        };
        let entity_col = meta("entity_column")?;
        let year_col = meta("year_column")?;

        let names = {
            let mut stmt = conn.prepare(&format!(
                "SELECT name FROM {} ORDER BY position",
                quote_ident(PRODUCTION_COLUMNS_TABLE)
            ))?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        debug!(metrics = names.len(), %entity_col, %year_col, "opened storage");

        Ok(Self {
            conn: Mutex::new(conn),
            allowlist: MetricAllowlist::new(names),
            entity_col,
            year_col,
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entity(&self) -> String {
        quote_ident(&self.entity_col)
    }

    fn year(&self) -> String {
        quote_ident(&self.year_col)
    }

    fn query_json(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<JsonRow>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(params, |row| row_to_json(row, &names))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn query_list<T, F>(&self, sql: &str, params: &[&dyn ToSql], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, map)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn row_to_json(row: &Row<'_>, names: &[String]) -> rusqlite::Result<JsonRow> {
    let mut map = JsonRow::new();
    for (i, name) in names.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null | ValueRef::Blob(_) => JsonValue::Null,
            ValueRef::Integer(n) => JsonValue::from(n),
            ValueRef::Real(f) => JsonValue::from(f),
            ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        };
        map.insert(name.clone(), value);
    }
    Ok(map)
}

impl Storage for SqliteStorage {
    fn allowlist(&self) -> &MetricAllowlist {
        &self.allowlist
    }

    fn all_rows(&self) -> Result<Vec<JsonRow>> {
        self.query_json(&format!("SELECT * FROM {}", quote_ident(PROCESSED_TABLE)), &[])
    }

    fn row_for(&self, entity: &str, year: i64) -> Result<Option<JsonRow>> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?1 AND {} = ?2 LIMIT 1",
            quote_ident(PROCESSED_TABLE),
            self.entity(),
            self.year()
        );
        let mut rows = self.query_json(&sql, params![entity, year])?;
        Ok(rows.pop().map(|mut row| {
            row.remove(&self.entity_col);
            row.remove(&self.year_col);
            row
        }))
    }

    fn yearly(&self) -> Result<Vec<JsonRow>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(YEARLY_TABLE),
            self.year()
        );
        let rows = self.query_json(&sql, &[])?;
        Ok(rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(k, v)| (display_name(&k).to_string(), v))
                    .collect()
            })
            .collect())
    }

    fn decade_series(&self, metric: &Metric) -> Result<Vec<DecadePoint>> {
        let sql = format!(
            "SELECT {d}, {m} FROM {t} ORDER BY {d}",
            d = quote_ident(DECADE_COLUMN),
            m = metric.quoted(),
            t = quote_ident(DECADE_TABLE)
        );
        self.query_list(&sql, &[], |row| {
            Ok(DecadePoint {
                decade: row.get(0)?,
                production: row.get(1)?,
            })
        })
    }

    fn scatter(&self, x: &Metric, y: &Metric) -> Result<Vec<JsonRow>> {
        let sql = format!(
            "SELECT {e}, {x}, {y} FROM {t} WHERE {yr} = (SELECT MAX({yr}) FROM {t})",
            e = self.entity(),
            x = x.quoted(),
            y = y.quoted(),
            yr = self.year(),
            t = quote_ident(PROCESSED_TABLE)
        );
        self.query_json(&sql, &[])
    }

    fn summary(&self) -> Result<JsonRow> {
        let rows = self.query_json(&format!("SELECT * FROM {}", quote_ident(STATS_TABLE)), &[])?;
        let mut out = JsonRow::new();
        for mut row in rows {
            let Some(JsonValue::String(stat)) = row.remove(crate::constants::STATISTIC_COLUMN) else {
                continue;
            };
            out.insert(stat, JsonValue::Object(row));
        }
        Ok(out)
    }

    fn product_stats(&self, metric: &Metric) -> Result<Option<ProductStats>> {
        let sql = format!(
            "SELECT {m} FROM {t} WHERE {m} IS NOT NULL",
            m = metric.quoted(),
            t = quote_ident(PROCESSED_TABLE)
        );
        let values = self.query_list(&sql, &[], |row| row.get::<_, f64>(0))?;
        Ok(ProductStats::from_values(&values))
    }

    fn entities(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT {e} FROM {t} ORDER BY {e}",
            e = self.entity(),
            t = quote_ident(PROCESSED_TABLE)
        );
        self.query_list(&sql, &[], |row| row.get(0))
    }

    fn years(&self) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT {y} FROM {t} ORDER BY {y} DESC",
            y = self.year(),
            t = quote_ident(PROCESSED_TABLE)
        );
        self.query_list(&sql, &[], |row| row.get(0))
    }

    fn trend(&self, entity: &str, metric: &Metric) -> Result<Vec<TrendPoint>> {
        let sql = format!(
            "SELECT {y}, {m} FROM {t} WHERE {e} = ?1 ORDER BY {y}",
            y = self.year(),
            m = metric.quoted(),
            e = self.entity(),
            t = quote_ident(PROCESSED_TABLE)
        );
        self.query_list(&sql, params![entity], |row| {
            Ok(TrendPoint {
                year: row.get(0)?,
                production: row.get(1)?,
            })
        })
    }

    fn country_trends(&self, entity: &str) -> Result<Vec<JsonRow>> {
        let sql = format!(
            "SELECT * FROM {t} WHERE {e} = ?1 ORDER BY {y}",
            t = quote_ident(PROCESSED_TABLE),
            e = self.entity(),
            y = self.year()
        );
        let rows = self.query_json(&sql, params![entity])?;
        Ok(rows
            .into_iter()
            .map(|mut row| {
                row.remove(&self.entity_col);
                row
            })
            .collect())
    }

    fn distribution(&self, year: i64, metric: &Metric) -> Result<Vec<DistributionPoint>> {
        let sql = format!(
            "SELECT {e}, {m} FROM {t} WHERE {y} = ?1",
            e = self.entity(),
            m = metric.quoted(),
            y = self.year(),
            t = quote_ident(PROCESSED_TABLE)
        );
        self.query_list(&sql, params![year], |row| {
            Ok(DistributionPoint {
                entity: row.get(0)?,
                value: row.get(1)?,
            })
        })
    }

    fn stacked(&self, year: i64, metrics: &[Metric]) -> Result<Vec<JsonRow>> {
        let columns: Vec<String> = std::iter::once(self.entity())
            .chain(metrics.iter().map(|m| {
                format!("{} AS {}", m.quoted(), quote_ident(display_name(m.name())))
            }))
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            columns.join(", "),
            quote_ident(PROCESSED_TABLE),
            self.year()
        );
        self.query_json(&sql, params![year])
    }

    fn bubble(&self) -> Result<Vec<BubbleRecord>> {
        let metrics = self.allowlist.metrics();
        if metrics.is_empty() {
            return Ok(Vec::new());
        }
        let sums: Vec<String> = metrics
            .iter()
            .map(|m| format!("SUM({q}) AS {q}", q = m.quoted()))
            .collect();
        let sql = format!(
            "SELECT {e}, {} FROM {t} GROUP BY {e} ORDER BY {e}",
            sums.join(", "),
            e = self.entity(),
            t = quote_ident(PROCESSED_TABLE)
        );
        let rows = self.query_list(&sql, &[], |row| {
            let country: String = row.get(0)?;
            let totals = metrics
                .iter()
                .enumerate()
                .map(|(i, m)| Ok((m.name().to_string(), row.get::<_, Option<f64>>(i + 1)?)))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok((country, totals))
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|(country, totals)| BubbleRecord::from_totals(country, &totals))
            .collect())
    }

    fn top_producers(&self, crop_type: &str, limit: i64) -> Result<Vec<TopProducerRow>> {
        let sql = format!(
            "SELECT region, production FROM {} WHERE crop_type = ?1
             ORDER BY production DESC, rank LIMIT ?2",
            quote_ident(TOP_PRODUCERS_TABLE)
        );
        self.query_list(&sql, params![crop_type, limit], |row| {
            Ok(TopProducerRow {
                region: row.get(0)?,
                production_value: row.get(1)?,
            })
        })
    }

    fn crop_types(&self) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT DISTINCT crop_type FROM {} ORDER BY crop_type",
            quote_ident(TOP_PRODUCERS_TABLE)
        );
        self.query_list(&sql, &[], |row| row.get(0))
    }
}
