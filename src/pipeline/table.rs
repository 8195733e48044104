use std::fmt;

/// Header plus string cells, exactly as read from the source file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A typed cell of the record table.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    /// Production metric; `None` is a missing value.
    Num(Option<f64>),
}

impl Value {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => *n,
            _ => None,
        }
    }

    /// Key used for exact-duplicate detection. Two missing numbers are equal.
    pub(crate) fn dedup_key(&self, out: &mut String) {
        use std::fmt::Write;
        let _ = match self {
            Value::Text(s) => write!(out, "t{}:{}\u{1f}", s.len(), s),
            Value::Int(i) => write!(out, "i{}\u{1f}", i),
            Value::Num(Some(n)) => write!(out, "n{:x}\u{1f}", normalize_zero(*n).to_bits()),
            Value::Num(None) => write!(out, "n-\u{1f}"),
        };
    }
}

fn normalize_zero(n: f64) -> f64 {
    if n == 0.0 {
        0.0
    } else {
        n
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Int(i) => write!(f, "{i}"),
            Value::Num(Some(n)) => write!(f, "{n}"),
            Value::Num(None) => Ok(()),
        }
    }
}

/// Which column plays which role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRoles {
    pub entity: usize,
    pub year: usize,
    /// Production metric columns in header order.
    pub production: Vec<usize>,
}

/// The record table handed from stage to stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub roles: ColumnRoles,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn entity_column(&self) -> &str {
        &self.columns[self.roles.entity]
    }

    pub fn year_column(&self) -> &str {
        &self.columns[self.roles.year]
    }

    pub fn production_columns(&self) -> Vec<String> {
        self.roles
            .production
            .iter()
            .map(|&i| self.columns[i].clone())
            .collect()
    }

    pub fn entity<'a>(&self, row: &'a [Value]) -> &'a str {
        row[self.roles.entity].as_text().unwrap_or_default()
    }

    /// Year of a row. The normalizer guarantees every row carries one.
    pub fn year(&self, row: &[Value]) -> i64 {
        row[self.roles.year].as_int().unwrap_or_default()
    }

    pub fn latest_year(&self) -> Option<i64> {
        self.rows.iter().map(|r| self.year(r)).max()
    }

    /// Non-missing values of one column, in row order.
    pub fn column_values(&self, col: usize) -> Vec<f64> {
        self.rows.iter().filter_map(|r| r[col].as_num()).collect()
    }
}

/// Decade bucket of a year: `floor(year / 10) * 10`.
pub fn decade_of(year: i64) -> i64 {
    year.div_euclid(10) * 10
}

/// Round to an integer, ties to even.
pub fn round0(v: f64) -> f64 {
    v.round_ties_even()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decade_floors_towards_negative_infinity() {
        assert_eq!(decade_of(1999), 1990);
        assert_eq!(decade_of(2000), 2000);
        assert_eq!(decade_of(2009), 2000);
        assert_eq!(decade_of(-1), -10);
    }

    #[test]
    fn rounding_uses_ties_to_even() {
        assert_eq!(round0(2.5), 2.0);
        assert_eq!(round0(3.5), 4.0);
        assert_eq!(round0(-0.4), -0.0);
    }

    #[test]
    fn missing_numbers_share_a_dedup_key() {
        let mut a = String::new();
        let mut b = String::new();
        Value::Num(None).dedup_key(&mut a);
        Value::Num(None).dedup_key(&mut b);
        assert_eq!(a, b);

        let mut c = String::new();
        Value::Text(String::new()).dedup_key(&mut c);
        assert_ne!(a, c);
    }

    #[test]
    fn display_drops_trailing_zero_fraction() {
        assert_eq!(Value::Num(Some(100.0)).to_string(), "100");
        assert_eq!(Value::Num(None).to_string(), "");
        assert_eq!(Value::Int(2001).to_string(), "2001");
    }
}
