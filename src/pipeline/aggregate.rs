use crate::constants::DECADE_COLUMN;
use crate::pipeline::clean::quantile_sorted;
use crate::pipeline::table::{decade_of, round0, Table};
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, instrument};

/// Mean of every production column per bucket (year or decade).
#[derive(Debug, Clone, PartialEq)]
pub struct BucketAggregate {
    pub key_column: String,
    pub metrics: Vec<String>,
    pub rows: Vec<(i64, Vec<Option<f64>>)>,
}

impl BucketAggregate {
    pub fn get(&self, key: i64, metric: &str) -> Option<f64> {
        let col = self.metrics.iter().position(|m| m == metric)?;
        self.rows
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, values)| values[col])
    }
}

pub const STATISTICS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

/// Describe-style statistics: one row per entry of [`STATISTICS`], one column per metric.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStatistics {
    pub metrics: Vec<String>,
    pub rows: Vec<(&'static str, Vec<Option<f64>>)>,
}

impl SummaryStatistics {
    pub fn get(&self, statistic: &str, metric: &str) -> Option<f64> {
        let col = self.metrics.iter().position(|m| m == metric)?;
        self.rows
            .iter()
            .find(|(s, _)| *s == statistic)
            .and_then(|(_, values)| values[col])
    }
}

/// Ranked (entity, value) pairs for the latest year, per metric.
///
/// Serializes as `{metric: {entity: value}}` with rank order preserved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopProducers {
    pub year: Option<i64>,
    pub rankings: Vec<(String, Vec<(String, f64)>)>,
}

impl TopProducers {
    pub fn ranking(&self, metric: &str) -> Option<&[(String, f64)]> {
        self.rankings
            .iter()
            .find(|(m, _)| m == metric)
            .map(|(_, r)| r.as_slice())
    }
}

struct Ranking<'a>(&'a [(String, f64)]);

impl Serialize for Ranking<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (entity, value) in self.0 {
            map.serialize_entry(entity, value)?;
        }
        map.end()
    }
}

impl Serialize for TopProducers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rankings.len()))?;
        for (metric, ranking) in &self.rankings {
            map.serialize_entry(metric, &Ranking(ranking))?;
        }
        map.end()
    }
}

/// Reads a JSON object into ordered pairs, keeping document order.
struct OrderedPairs<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedPairs<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PairsVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
            type Value = OrderedPairs<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    pairs.push(entry);
                }
                Ok(OrderedPairs(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor(PhantomData))
    }
}

impl<'de> Deserialize<'de> for TopProducers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let OrderedPairs(metrics) = OrderedPairs::<OrderedPairs<f64>>::deserialize(deserializer)?;
        Ok(TopProducers {
            year: None,
            rankings: metrics.into_iter().map(|(m, OrderedPairs(r))| (m, r)).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregates {
    pub yearly: BucketAggregate,
    pub decade: BucketAggregate,
    pub summary: SummaryStatistics,
    pub top_producers: TopProducers,
}

#[instrument(level = "info", skip_all, fields(rows = table.len()))]
pub fn aggregate(table: &Table, top_n: usize) -> Aggregates {
    let yearly = bucket_means(table, table.year_column(), |y| y);
    let decade = bucket_means(table, DECADE_COLUMN, decade_of);
    let summary = summary_statistics(table);
    let top_producers = top_producers(table, top_n);
    debug!(
        years = yearly.rows.len(),
        decades = decade.rows.len(),
        "computed aggregates"
    );
    Aggregates {
        yearly,
        decade,
        summary,
        top_producers,
    }
}

/// Group rows by `bucket(year)` and average each metric over its non-missing values.
pub fn bucket_means(table: &Table, key_column: &str, bucket: impl Fn(i64) -> i64) -> BucketAggregate {
    let metrics = &table.roles.production;
    let mut groups: BTreeMap<i64, Vec<(f64, usize)>> = BTreeMap::new();
    for row in &table.rows {
        let sums = groups
            .entry(bucket(table.year(row)))
            .or_insert_with(|| vec![(0.0, 0); metrics.len()]);
        for (slot, &col) in sums.iter_mut().zip(metrics) {
            if let Some(v) = row[col].as_num() {
                slot.0 += v;
                slot.1 += 1;
            }
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, sums)| {
            let means = sums
                .into_iter()
                .map(|(sum, n)| (n > 0).then(|| round0(sum / n as f64)))
                .collect();
            (key, means)
        })
        .collect();

    BucketAggregate {
        key_column: key_column.to_string(),
        metrics: table.production_columns(),
        rows,
    }
}

pub fn summary_statistics(table: &Table) -> SummaryStatistics {
    let per_metric: Vec<[Option<f64>; 8]> = table
        .roles
        .production
        .iter()
        .map(|&col| describe(table.column_values(col)))
        .collect();

    let rows = STATISTICS
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let values = per_metric
                .iter()
                .map(|stats| stats[i].map(round0))
                .collect();
            (*name, values)
        })
        .collect();

    SummaryStatistics {
        metrics: table.production_columns(),
        rows,
    }
}

/// count, mean, sample std, min, quartiles, max of `values`.
fn describe(mut values: Vec<f64>) -> [Option<f64>; 8] {
    let n = values.len();
    if n == 0 {
        return [Some(0.0), None, None, None, None, None, None, None];
    }
    values.sort_by(f64::total_cmp);
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = (n > 1).then(|| {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    });
    [
        Some(n as f64),
        Some(mean),
        std,
        Some(values[0]),
        Some(quantile_sorted(&values, 0.25)),
        Some(quantile_sorted(&values, 0.5)),
        Some(quantile_sorted(&values, 0.75)),
        Some(values[n - 1]),
    ]
}

/// Top `n` entities per metric for the latest year, descending, ties in input order.
pub fn top_producers(table: &Table, n: usize) -> TopProducers {
    let Some(latest) = table.latest_year() else {
        return TopProducers {
            year: None,
            rankings: table
                .production_columns()
                .into_iter()
                .map(|m| (m, Vec::new()))
                .collect(),
        };
    };

    let latest_rows: Vec<_> = table
        .rows
        .iter()
        .filter(|r| table.year(r) == latest)
        .collect();

    let rankings = table
        .roles
        .production
        .iter()
        .map(|&col| {
            let mut candidates: Vec<(&str, f64)> = latest_rows
                .iter()
                .filter_map(|r| r[col].as_num().map(|v| (table.entity(r), v)))
                .collect();
            // stable: equal values keep input order
            candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

            let mut seen = HashSet::new();
            let ranking = candidates
                .into_iter()
                .filter(|(entity, _)| seen.insert(*entity))
                .take(n)
                .map(|(entity, v)| (entity.to_string(), round0(v)))
                .collect();
            (table.columns[col].clone(), ranking)
        })
        .collect();

    TopProducers {
        year: Some(latest),
        rankings,
    }
}
