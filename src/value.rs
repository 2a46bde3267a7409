use serde_json::{Number, Value};
use std::fmt;

use crate::errors::{FieldError, Result};

/// Raw value as it travels between callers, doc values and display coercion.
///
/// Keywords are carried internally as UTF-8 bytes, so `Bytes` is the only
/// representation display coercion accepts. Term normalization accepts every
/// variant except `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bytes(Vec<u8>),
    Text(String),
    Long(i64),
    UnsignedLong(u64),
    Double(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Normalize a term argument to the string the script values are compared against.
    pub fn to_term_string(&self) -> Result<String> {
        match self {
            FieldValue::Null => Err(FieldError::InvalidArgument(
                "term value must not be null".into(),
            )),
            FieldValue::Bytes(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            FieldValue::Text(s) => Ok(s.clone()),
            FieldValue::Long(n) => Ok(n.to_string()),
            FieldValue::UnsignedLong(n) => Ok(n.to_string()),
            FieldValue::Double(d) => Ok(double_string(*d)),
            FieldValue::Bool(b) => Ok(b.to_string()),
        }
    }
}

/// Doubles print the way JSON numbers do in documents, so `1.0` stays `"1.0"`.
/// NaN and infinities have no JSON form and keep Rust's debug text.
fn double_string(d: f64) -> String {
    Number::from_f64(d).map_or_else(|| format!("{d:?}"), |n| n.to_string())
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Long(n) => write!(f, "{n}"),
            FieldValue::UnsignedLong(n) => write!(f, "{n}"),
            FieldValue::Double(d) => f.write_str(&double_string(*d)),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(b: &[u8]) -> Self {
        FieldValue::Bytes(b.to_vec())
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Long(n)
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::UnsignedLong(n)
    }
}

impl From<f64> for FieldValue {
    fn from(d: f64) -> Self {
        FieldValue::Double(d)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// JSON arguments from the command line. Arrays and objects fall back to
/// their compact JSON text.
impl From<&Value> for FieldValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Long(i)
                } else if let Some(u) = n.as_u64() {
                    FieldValue::UnsignedLong(u)
                } else {
                    FieldValue::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}
