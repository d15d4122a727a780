//! # Value Type System
//!
//! Runtime values flowing through the evaluator: primitives (int, float,
//! str, bool, date), null, and the two composite shapes produced by
//! relation traversal - a row and a list of projected values.
//!
//! Semantics follow the formula language contract: numeric kinds promote
//! to float on mixed arithmetic, comparisons are loose across int/float,
//! and truthiness treats zero, empty, and null as false.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// A single entity row: field name -> value.
pub type Row = HashMap<String, Value>;

/// A runtime value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Str(String),
    Null,
    /// Projected column over related rows (e.g. `members.income`).
    List(Vec<Value>),
    /// A dereferenced row (e.g. the target of a foreign key).
    Row(Row),
}

/// Declared type of an entity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Str,
    Bool,
    Date,
}

impl FieldType {
    /// Parse a declared type name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int" => Some(FieldType::Int),
            "float" => Some(FieldType::Float),
            "str" => Some(FieldType::Str),
            "bool" => Some(FieldType::Bool),
            "date" => Some(FieldType::Date),
            _ => None,
        }
    }

    /// Check if a value matches this field type.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldType::Int, Value::Int(_)) => true,
            (FieldType::Float, Value::Float(_)) => true,
            // ints coerce to float fields
            (FieldType::Float, Value::Int(_)) => true,
            (FieldType::Str, Value::Str(_)) => true,
            (FieldType::Bool, Value::Bool(_)) => true,
            (FieldType::Date, Value::Date(_)) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hashable projection of a value, used to index primary keys.
///
/// Floats are deliberately not indexable: a float primary key is a data
/// error, reported during validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl Value {
    /// Name of the value's kind, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Date(_) => "date",
            Value::Str(_) => "str",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Row(_) => "row",
        }
    }

    /// Truthiness: zero, empty, and null are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
            Value::List(items) => !items.is_empty(),
            Value::Date(_) | Value::Row(_) => true,
        }
    }

    /// Numeric view of the value, if it has one. Bools count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// True when the value carries a numeric kind (bools included).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    /// Loose equality: int and float compare by numeric value, otherwise
    /// kinds must match.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => {
                // as_f64 is total on numeric kinds
                self.as_f64() == other.as_f64()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            _ => false,
        }
    }

    /// Ordering for comparison operators. Numeric kinds compare by value,
    /// strings lexicographically, dates chronologically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (a, b) if a.is_numeric() && b.is_numeric() => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Projection usable as a primary-key index entry.
    pub fn as_key(&self) -> Option<DataKey> {
        match self {
            Value::Int(i) => Some(DataKey::Int(*i)),
            Value::Str(s) => Some(DataKey::Str(s.clone())),
            Value::Bool(b) => Some(DataKey::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
            Value::Null => write!(f, "null"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Row(_) => write!(f, "<row>"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(Value::Str("x".into()).is_truthy());
        assert!(!Value::Null.is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::List(vec![Value::Int(0)]).is_truthy());
    }

    #[test]
    fn test_loose_eq_across_numeric_kinds() {
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).loose_eq(&Value::Int(1)));
        assert!(!Value::Int(1).loose_eq(&Value::Str("1".into())));
    }

    #[test]
    fn test_compare_mixed_numeric() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Str("a".into()).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_key_projection() {
        assert_eq!(Value::Int(7).as_key(), Some(DataKey::Int(7)));
        assert_eq!(Value::Float(7.0).as_key(), None);
    }

    #[test]
    fn test_untagged_serialization() {
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Int(42));
        let v: Value = serde_json::from_str("42.5").unwrap();
        assert_eq!(v, Value::Float(42.5));
        let v: Value = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(v, Value::Str("hello".into()));
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
    }
}
