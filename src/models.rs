use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One loosely-typed row returned by the analytics API.
///
/// Numeric columns may be absent, `null`, JSON numbers or decimal strings
/// (Postgres NUMERIC values arrive as strings). Every numeric read goes
/// through [`MetricRecord::number`], which folds the missing cases to 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRecord(Map<String, Value>);

impl MetricRecord {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Numeric value of `field`, `None` when absent, null or not numeric.
    pub fn number_opt(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(value_as_number)
    }

    /// Numeric value of `field` with null/missing/unparseable coerced to 0.
    pub fn number(&self, field: &str) -> f64 {
        self.number_opt(field).unwrap_or(0.0)
    }

    /// Display text of `field`; null and missing render as an empty string.
    pub fn text(&self, field: &str) -> String {
        match self.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(", "),
            Some(other) => other.to_string(),
        }
    }

    pub fn cell(&self, field: &str) -> Cell {
        match self.get(field) {
            None | Some(Value::Null) => Cell::Empty,
            Some(Value::Number(n)) => n.as_f64().map(Cell::Number).unwrap_or(Cell::Empty),
            Some(_) => Cell::Text(self.text(field)),
        }
    }

    /// Normalized view of the core metrics.
    pub fn metrics(&self) -> Metrics {
        Metrics::from_record(self)
    }
}

impl From<Map<String, Value>> for MetricRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// API column names for the metrics the classifier reads.
pub mod fields {
    pub const ENGAGEMENT: &str = "total_engagement_score";
    pub const SALES: &str = "total_sales";
    pub const PROGRAMS: &str = "total_programs";
    pub const TASKS: &str = "total_tasks";
    pub const CONVERSION_RATE_PCT: &str = "program_conversion_rate";
    /// Present on efficient-converter rows as `sales_efficiency` and on
    /// conversion segment rows as `conversion_efficiency`.
    pub const EFFICIENCY: [&str; 2] = ["sales_efficiency", "conversion_efficiency"];
    pub const Z_SCORE: &str = "z_score";
}

/// Core metrics of a record after null normalization.
///
/// - `engagement`: `total_engagement_score`, 0 when missing.
/// - `sales`: `total_sales`, 0 when missing.
/// - `programs` / `tasks`: participation counts, 0 when missing.
/// - `conversion_rate_pct`: `program_conversion_rate` in percent (0-100), 0 when missing.
/// - `efficiency`: upstream-supplied sales/engagement ratio, `None` when the
///   row does not carry one; callers recompute it from `sales` and `engagement`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Metrics {
    pub engagement: f64,
    pub sales: f64,
    pub programs: f64,
    pub tasks: f64,
    pub conversion_rate_pct: f64,
    pub efficiency: Option<f64>,
}

impl Metrics {
    pub fn from_record(record: &MetricRecord) -> Self {
        Self {
            engagement: record.number(fields::ENGAGEMENT),
            sales: record.number(fields::SALES),
            programs: record.number(fields::PROGRAMS),
            tasks: record.number(fields::TASKS),
            conversion_rate_pct: record.number(fields::CONVERSION_RATE_PCT),
            efficiency: fields::EFFICIENCY
                .iter()
                .find_map(|field| record.number_opt(field)),
        }
    }
}

/// One CSV cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(s) => f.write_str(s),
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Empty => Ok(()),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

#[cfg(test)]
pub(crate) fn record(value: Value) -> MetricRecord {
    match value {
        Value::Object(map) => MetricRecord(map),
        _ => MetricRecord::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_and_null_numbers_read_as_zero() {
        let row = record(json!({ "total_sales": null }));
        assert_eq!(row.number(fields::SALES), 0.0);
        assert_eq!(row.number(fields::ENGAGEMENT), 0.0);
        assert_eq!(row.number_opt(fields::SALES), None);
    }

    #[test]
    fn decimal_strings_parse_as_numbers() {
        let row = record(json!({ "total_sales": "1250.50", "email": "a@b.co" }));
        assert_eq!(row.number(fields::SALES), 1250.5);
        assert_eq!(row.number("email"), 0.0);
    }

    #[test]
    fn metrics_prefer_supplied_efficiency() {
        let row = record(json!({
            "total_engagement_score": 100,
            "total_sales": 40,
            "conversion_efficiency": "0.4000"
        }));
        let metrics = row.metrics();
        assert_eq!(metrics.engagement, 100.0);
        assert_eq!(metrics.efficiency, Some(0.4));
        assert_eq!(metrics.tasks, 0.0);
    }

    #[test]
    fn text_joins_arrays_and_blanks_nulls() {
        let row = record(json!({ "handles": ["@a", "@b"], "name": null }));
        assert_eq!(row.text("handles"), "@a, @b");
        assert_eq!(row.text("name"), "");
        assert_eq!(row.cell("name"), Cell::Empty);
    }
}
