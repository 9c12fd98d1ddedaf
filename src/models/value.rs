//! Scalar values carried by batch rows and store parameters

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Surrogate key assigned by the store
pub type SurrogateKey = i64;

/// A typed scalar value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Missing value
    #[default]
    Null,
    /// Text value
    String(String),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Calendar date
    Date(NaiveDate),
    /// Date with time of day
    DateTime(NaiveDateTime),
}

impl Value {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the value as a string slice, if it is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the value as an integer, if it is one
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Check if the value is date-valued (date or timestamp)
    pub fn is_temporal(&self) -> bool {
        matches!(self, Value::Date(_) | Value::DateTime(_))
    }

    /// Normalize a value for use in a natural key
    ///
    /// Dates and timestamps collapse to an integer `YYYYMMDD`, so two
    /// timestamps on the same calendar day produce the same key component.
    pub fn to_key_component(&self) -> Value {
        match self {
            Value::Date(d) => Value::Integer(date_key(*d)),
            Value::DateTime(dt) => Value::Integer(date_key(dt.date())),
            other => other.clone(),
        }
    }

    /// Read a store value back in the variant of a requested key component
    ///
    /// Stores may return a bound value in their column's own type, e.g. an
    /// integer read back from a text or double column. Values that do not
    /// convert cleanly are returned unchanged.
    pub fn conform_to(&self, like: &Value) -> Value {
        match (like, self.to_key_component()) {
            (Value::Integer(_), Value::Float(f)) if f.fract() == 0.0 => Value::Integer(f as i64),
            (Value::Integer(_), Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Integer(i),
                Err(_) => Value::String(s),
            },
            (Value::Float(_), Value::Integer(i)) => Value::Float(i as f64),
            (Value::Float(_), Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => Value::String(s),
            },
            (Value::String(_), Value::Integer(i)) => Value::String(i.to_string()),
            (_, other) => other,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
        }
    }
}

/// Canonical integer representation of a calendar date (`YYYYMMDD`)
pub fn date_key(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Date(d) => d.hash(state),
            Value::DateTime(dt) => dt.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::String(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// An ordered tuple of natural-key values
///
/// Components are always normalized with [`Value::to_key_component`]
/// before a tuple is built, so equal business keys hash equally.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyTuple(pub Vec<Value>);

impl KeyTuple {
    /// Build a tuple from raw values, normalizing each component
    pub fn normalized<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        Self(values.into_iter().map(Value::to_key_component).collect())
    }

    /// Tuple components
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Check if any component is null
    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }

    /// Number of components
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the tuple has no components
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_date_key() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(date_key(d), 20240307);
    }

    #[test]
    fn test_timestamps_on_same_day_collapse() {
        let morning = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap();
        let evening = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(21, 40, 12)
            .unwrap();

        let a = KeyTuple::normalized(&[Value::DateTime(morning)]);
        let b = KeyTuple::normalized(&[Value::DateTime(evening)]);
        assert_eq!(a, b);
        assert_eq!(a.values()[0], Value::Integer(20240307));
    }

    #[test]
    fn test_values_hash_by_content() {
        let mut set = HashSet::new();
        set.insert(KeyTuple(vec![Value::from("a"), Value::Float(1.5)]));
        set.insert(KeyTuple(vec![Value::from("a"), Value::Float(1.5)]));
        set.insert(KeyTuple(vec![Value::from("a"), Value::Null]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_conform_to_requested_variant() {
        assert_eq!(Value::from("5").conform_to(&Value::Integer(1)), Value::Integer(5));
        assert_eq!(Value::Float(5.0).conform_to(&Value::Integer(1)), Value::Integer(5));
        assert_eq!(Value::Integer(5).conform_to(&Value::Float(0.5)), Value::Float(5.0));
        assert_eq!(Value::Integer(7).conform_to(&Value::from("x")), Value::from("7"));
        assert_eq!(Value::Float(5.5).conform_to(&Value::Integer(1)), Value::Float(5.5));
        assert_eq!(Value::from("n/a").conform_to(&Value::Integer(1)), Value::from("n/a"));
        assert_eq!(Value::Null.conform_to(&Value::Integer(1)), Value::Null);

        let day = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(Value::Date(day).conform_to(&Value::Integer(1)), Value::Integer(20240307));
    }

    #[test]
    fn test_integer_and_float_are_distinct() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Null, Value::from(""));
    }
}
