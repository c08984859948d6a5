//! Value comparison used by fixed, pattern and min/max assertions.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// Structural "superset" match used by pattern[x].
///
/// - Null or empty object/array patterns match anything
/// - Object pattern: every key must exist in the item with a matching value
/// - Array pattern: every pattern element must match at least one item element
/// - Scalars: strict equality
pub fn deep_partial_match(item: &JsonValue, pattern: &JsonValue) -> bool {
    match pattern {
        JsonValue::Null => true,
        JsonValue::Object(pattern_map) => {
            if pattern_map.is_empty() {
                return true;
            }
            let Some(item_map) = item.as_object() else {
                return false;
            };
            pattern_map.iter().all(|(key, pattern_value)| {
                item_map
                    .get(key)
                    .is_some_and(|item_value| deep_partial_match(item_value, pattern_value))
            })
        }
        JsonValue::Array(pattern_items) => {
            if pattern_items.is_empty() {
                return true;
            }
            let Some(items) = item.as_array() else {
                return false;
            };
            pattern_items
                .iter()
                .all(|p| items.iter().any(|i| deep_partial_match(i, p)))
        }
        scalar => scalar == item,
    }
}

/// Exact match used by fixed[x]: same shape, same members, same values.
pub fn exact_match(item: &JsonValue, fixed: &JsonValue) -> bool {
    item == fixed
}

/// A value that participates in minValue/maxValue comparisons.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparableValue {
    Number(f64),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Time(NaiveTime),
    Quantity { value: f64, unit: Option<String> },
}

impl ComparableValue {
    /// Interpret a JSON value as a comparable value.
    ///
    /// Strings are tried as time, date and dateTime in that order; objects are
    /// read as Quantity (`value` plus `code` or `unit`).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_f64().map(ComparableValue::Number),
            JsonValue::String(s) => parse_temporal(s),
            JsonValue::Object(object) => {
                let amount = object.get("value")?.as_f64()?;
                let unit = object
                    .get("code")
                    .or_else(|| object.get("unit"))
                    .and_then(|u| u.as_str())
                    .map(str::to_string);
                Some(ComparableValue::Quantity {
                    value: amount,
                    unit,
                })
            }
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ComparableValue::Number(_) => "number",
            ComparableValue::Date(_) => "date",
            ComparableValue::DateTime(_) => "dateTime",
            ComparableValue::Time(_) => "time",
            ComparableValue::Quantity { .. } => "Quantity",
        }
    }

    /// Order two values of the same comparable kind.
    ///
    /// Returns `None` for different kinds or quantities with different units.
    pub fn compare(&self, other: &ComparableValue) -> Option<Ordering> {
        match (self, other) {
            (ComparableValue::Number(a), ComparableValue::Number(b)) => a.partial_cmp(b),
            (ComparableValue::Date(a), ComparableValue::Date(b)) => Some(a.cmp(b)),
            (ComparableValue::DateTime(a), ComparableValue::DateTime(b)) => Some(a.cmp(b)),
            (ComparableValue::Time(a), ComparableValue::Time(b)) => Some(a.cmp(b)),
            (
                ComparableValue::Quantity { value: a, unit: ua },
                ComparableValue::Quantity { value: b, unit: ub },
            ) if ua == ub => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for ComparableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComparableValue::Number(n) => write!(f, "{n}"),
            ComparableValue::Date(d) => write!(f, "{d}"),
            ComparableValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            ComparableValue::Time(t) => write!(f, "{t}"),
            ComparableValue::Quantity { value, unit } => match unit {
                Some(unit) => write!(f, "{value} {unit}"),
                None => write!(f, "{value}"),
            },
        }
    }
}

fn parse_temporal(s: &str) -> Option<ComparableValue> {
    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
        return Some(ComparableValue::Time(time));
    }
    if s.contains('T') {
        return DateTime::parse_from_rfc3339(s)
            .ok()
            .map(ComparableValue::DateTime);
    }
    // Partial dates compare from their first day
    let padded = match s.len() {
        4 => format!("{s}-01-01"),
        7 => format!("{s}-01"),
        _ => s.to_string(),
    };
    NaiveDate::parse_from_str(&padded, "%Y-%m-%d")
        .ok()
        .map(ComparableValue::Date)
}
