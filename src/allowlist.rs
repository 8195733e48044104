//! Guard for metric names that reach SQL text.
//!
//! Column identifiers cannot be bound as parameters, so every metric name
//! coming from a request is checked against the production columns the
//! pipeline published. Only a [`Metric`] obtained from [`MetricAllowlist::check`]
//! can be interpolated into a query.

use crate::db::quote_ident;

/// A production column name known to exist in the served tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric(String);

impl Metric {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn quoted(&self) -> String {
        quote_ident(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricAllowlist {
    names: Vec<String>,
}

impl MetricAllowlist {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Exact, case-sensitive membership check.
    pub fn check(&self, name: &str) -> Option<Metric> {
        self.names
            .iter()
            .find(|n| n.as_str() == name)
            .map(|n| Metric(n.clone()))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn metrics(&self) -> Vec<Metric> {
        self.names.iter().cloned().map(Metric).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_columns_pass() {
        let allow = MetricAllowlist::new(vec!["Maize_Production".into(), "Rice_Production".into()]);
        assert_eq!(allow.check("Maize_Production").unwrap().name(), "Maize_Production");
        assert!(allow.check("maize_production").is_none());
        assert!(allow.check("Entity").is_none());
        assert!(allow.check("Maize_Production`; DROP TABLE processed_data; --").is_none());
    }
}
